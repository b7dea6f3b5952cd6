//! Stand-in for the gravity clustering engine used by end-to-end tests.
//!
//! Usage: `stub_engine <command> [-stdin] [-stdout] [-c <file>] [flags...]`.
//! Tuning flags are accepted and ignored; behaviour is selected through
//! `STUB_ENGINE_MODE`.

use std::{
    env,
    error::Error,
    fs,
    io::{self, Read, Write},
    process, thread,
    time::Duration,
};

use gravity_test_support::stub::{
    ARGS_FILE_VAR, FAIL_EXIT_CODE, FAIL_MESSAGE, FLOOD_LINES, MODE_VAR, StubMode, count_samples,
    label_for,
};

fn main() -> Result<(), Box<dyn Error>> {
    let arguments: Vec<String> = env::args().skip(1).collect();
    record_arguments(&arguments)?;
    let mode = read_mode()?;
    let payload = read_dataset(&arguments)?;
    let samples = count_samples(&payload);

    let stderr = io::stderr();
    let mut progress = stderr.lock();
    match mode {
        StubMode::Hang => {
            writeln!(progress, "s: 0 d: 0.5")?;
            progress.flush()?;
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
        StubMode::Flood => {
            for line in 0..FLOOD_LINES {
                writeln!(progress, "field sweep {line}")?;
            }
        }
        _ => {}
    }

    for point in 0..samples {
        writeln!(progress, "s: {point} d: 0.5")?;
    }
    if mode == StubMode::Fail {
        writeln!(progress, "{FAIL_MESSAGE}")?;
        progress.flush()?;
        process::exit(FAIL_EXIT_CODE);
    }
    writeln!(progress, "Clusters: {}", samples.min(3))?;
    progress.flush()?;

    let labels = match mode {
        StubMode::Silent => String::new(),
        StubMode::Short => render_labels(samples.saturating_sub(1)),
        StubMode::Garbage => format!("{} x\n", render_labels(samples).trim_end()),
        _ => render_labels(samples),
    };
    let mut stdout = io::stdout().lock();
    stdout.write_all(labels.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn read_mode() -> Result<StubMode, Box<dyn Error>> {
    match env::var(MODE_VAR) {
        Ok(value) => Ok(value.parse()?),
        Err(env::VarError::NotPresent) => Ok(StubMode::default()),
        Err(error) => Err(error.into()),
    }
}

fn record_arguments(arguments: &[String]) -> Result<(), Box<dyn Error>> {
    let Some(path) = env::var_os(ARGS_FILE_VAR) else {
        return Ok(());
    };
    let mut listing = arguments.join("\n");
    listing.push('\n');
    fs::write(path, listing)?;
    Ok(())
}

fn read_dataset(arguments: &[String]) -> Result<String, Box<dyn Error>> {
    if arguments.iter().any(|argument| argument == "-stdin") {
        let mut payload = String::new();
        io::stdin().read_to_string(&mut payload)?;
        return Ok(payload);
    }
    let path = arguments
        .iter()
        .position(|argument| argument == "-c")
        .and_then(|index| arguments.get(index + 1))
        .ok_or("expected -stdin or -c <file>")?;
    Ok(fs::read_to_string(path)?)
}

fn render_labels(samples: usize) -> String {
    (0..samples)
        .map(|index| format!("{}\n", label_for(index)))
        .collect()
}
