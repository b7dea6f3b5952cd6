//! Parsing of the engine's label stream and the assignment it produces.

use std::{collections::HashSet, str};

use crate::error::ParseError;

/// Per-sample cluster labels, index-aligned with the input dataset.
///
/// # Examples
/// ```
/// use gravity_core::ClusterAssignment;
///
/// let assignment = ClusterAssignment::from_labels(vec![0, 1, 1, -1]);
/// assert_eq!(assignment.len(), 4);
/// assert_eq!(assignment.cluster_count(), 3);
/// assert_eq!(assignment.labels(), &[0, 1, 1, -1]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<i64>,
}

impl ClusterAssignment {
    /// Wraps labels produced by the engine.
    #[must_use]
    pub const fn from_labels(labels: Vec<i64>) -> Self {
        Self { labels }
    }

    /// Returns the labels in sample order.
    #[must_use]
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// Returns the number of labelled samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` when no samples were labelled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the number of distinct labels.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.labels.iter().collect::<HashSet<_>>().len()
    }

    /// Iterates over the labels in sample order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = i64> + '_ {
        self.labels.iter().copied()
    }

    /// Consumes the assignment, returning the raw labels.
    #[must_use]
    pub fn into_labels(self) -> Vec<i64> {
        self.labels
    }
}

/// Parses a whitespace-delimited sequence of signed integer labels.
///
/// The parser knows nothing about the dataset, so it never checks the label
/// count.
///
/// # Errors
/// Returns [`ParseError::InvalidToken`] naming the first token that is not a
/// signed integer, its position among the tokens, and its byte offset.
///
/// # Examples
/// ```
/// use gravity_core::{ParseError, parse_labels};
///
/// assert_eq!(parse_labels("0 1 1 2\n")?, vec![0, 1, 1, 2]);
/// let err = parse_labels("0 x 1").expect_err("x is not a label");
/// assert!(matches!(err, ParseError::InvalidToken { ref token, index: 1, .. } if token == "x"));
/// # Ok::<(), ParseError>(())
/// ```
pub fn parse_labels(payload: &str) -> Result<Vec<i64>, ParseError> {
    let mut labels = Vec::new();
    let mut rest = payload;
    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        let offset = payload.len() - trimmed.len();
        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let (token, tail) = trimmed.split_at(end);
        let label = token
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidToken {
                token: token.to_owned(),
                index: labels.len(),
                offset,
            })?;
        labels.push(label);
        rest = tail;
    }
    Ok(labels)
}

/// Parses raw bytes captured from the engine's standard output.
///
/// # Errors
/// Returns [`ParseError::InvalidUtf8`] when the stream is not UTF-8, and the
/// errors of [`parse_labels`] otherwise.
pub fn parse_output(stdout: &[u8]) -> Result<Vec<i64>, ParseError> {
    let payload = str::from_utf8(stdout).map_err(|err| ParseError::InvalidUtf8 {
        valid_up_to: err.valid_up_to(),
    })?;
    parse_labels(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::spaces("0 1 1 2\n", vec![0, 1, 1, 2])]
    #[case::one_per_line("3\n-1\n0\n", vec![3, -1, 0])]
    #[case::mixed_whitespace("\t 4\r\n5  \n\n", vec![4, 5])]
    #[case::explicit_sign("+7 -7", vec![7, -7])]
    #[case::empty("", vec![])]
    #[case::blank("  \n\t", vec![])]
    fn parses_whitespace_delimited_labels(#[case] payload: &str, #[case] expected: Vec<i64>) {
        assert_eq!(parse_labels(payload).expect("labels must parse"), expected);
    }

    #[rstest]
    #[case::letter("0 x 1", "x", 1, 2)]
    #[case::float("1\n2.5\n", "2.5", 1, 2)]
    #[case::first_token("  nan 1", "nan", 0, 2)]
    #[case::overflow("99999999999999999999", "99999999999999999999", 0, 0)]
    fn reports_first_invalid_token(
        #[case] payload: &str,
        #[case] token: &str,
        #[case] index: usize,
        #[case] offset: usize,
    ) {
        let err = parse_labels(payload).expect_err("payload must be rejected");
        assert_eq!(
            err,
            ParseError::InvalidToken {
                token: token.to_owned(),
                index,
                offset,
            }
        );
    }

    #[test]
    fn rejects_non_utf8_output() {
        let err = parse_output(b"0 1 \xff").expect_err("invalid UTF-8 must be rejected");
        assert_eq!(err, ParseError::InvalidUtf8 { valid_up_to: 4 });
    }

    #[test]
    fn cluster_count_ignores_duplicates() {
        let assignment = ClusterAssignment::from_labels(vec![2, 2, 0, 2]);
        assert_eq!(assignment.cluster_count(), 2);
        assert_eq!(assignment.iter().collect::<Vec<_>>(), [2, 2, 0, 2]);
        assert_eq!(assignment.into_labels(), vec![2, 2, 0, 2]);
    }
}
