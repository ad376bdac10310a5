//! Error classification and aggregation.
//!
//! Every task outcome carries an explicit [`Severity`]. Errors from a batch
//! of sub-operations are folded into an [`ErrorList`], whose empty state is
//! never reported as an error: [`ErrorList::into_result`] turns it into
//! `Ok(())`.

use std::fmt;

/// How a task failure should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Expected or optional absence; recorded in the audit trail only.
    Ignorable,
    /// A real failure of one task; reported, siblings keep running.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ignorable => write!(f, "ignorable"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// The error value produced by a failed task.
#[derive(Debug)]
pub struct TaskError {
    severity: Severity,
    error: anyhow::Error,
}

impl TaskError {
    pub fn new(severity: Severity, error: impl Into<anyhow::Error>) -> Self {
        Self {
            severity,
            error: error.into(),
        }
    }

    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        Self::new(Severity::Fatal, error)
    }

    pub fn ignorable(error: impl Into<anyhow::Error>) -> Self {
        Self::new(Severity::Ignorable, error)
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_ignorable(&self) -> bool {
        self.severity == Severity::Ignorable
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for TaskError {}

/// Attach a severity to any fallible result.
pub trait SeverityExt<T> {
    fn ignorable(self) -> Result<T, TaskError>;
    fn fatal(self) -> Result<T, TaskError>;
}

impl<T, E> SeverityExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn ignorable(self) -> Result<T, TaskError> {
        self.map_err(TaskError::ignorable)
    }

    fn fatal(self) -> Result<T, TaskError> {
        self.map_err(TaskError::fatal)
    }
}

/// Ordered accumulation of errors.
///
/// Combining lists preserves insertion order and every message. The
/// rendered form of a single error is that error's own message; two or
/// more are rendered as `multiple errors:` followed by one message per line.
#[derive(Debug)]
pub struct ErrorList<E = TaskError> {
    errors: Vec<E>,
}

impl<E> ErrorList<E> {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    /// Record the error side of `result`, returning the success value.
    pub fn record<T>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.errors.iter()
    }

    /// Append every error of `other` after the errors of `self`.
    pub fn merge(mut self, other: Self) -> Self {
        self.errors.extend(other.errors);
        self
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl ErrorList<TaskError> {
    /// Ignorable only when every member is ignorable.
    pub fn severity(&self) -> Severity {
        if self.errors.iter().all(TaskError::is_ignorable) {
            Severity::Ignorable
        } else {
            Severity::Fatal
        }
    }

    /// Collapse into a single task outcome.
    pub fn into_task_result(mut self) -> Result<(), TaskError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => {
                let severity = self.severity();
                Err(TaskError::new(severity, self))
            }
        }
    }
}

impl<E> Default for ErrorList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Extend<E> for ErrorList<E> {
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl<E> FromIterator<E> for ErrorList<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl<E> IntoIterator for ErrorList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<E: fmt::Display> fmt::Display for ErrorList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "{}", only),
            many => {
                write!(f, "multiple errors:")?;
                for e in many {
                    write!(f, "\n{}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ErrorList<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_empty_list_is_absent() {
        let list: ErrorList<String> = ErrorList::new();
        assert!(list.into_result().is_ok());

        let list: ErrorList = ErrorList::new();
        assert!(list.into_task_result().is_ok());
    }

    #[test]
    fn test_single_error_message_unchanged() {
        let mut list = ErrorList::new();
        list.push("pods: forbidden".to_string());
        let err = list.into_result().unwrap_err();
        assert_eq!(err.to_string(), "pods: forbidden");
    }

    #[test]
    fn test_many_errors_keep_order() {
        let list: ErrorList<String> = ["first", "second", "third"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let text = list.into_result().unwrap_err().to_string();
        assert_eq!(text, "multiple errors:\nfirst\nsecond\nthird");
    }

    #[test]
    fn test_merge_appends() {
        let a: ErrorList<String> = vec!["a".to_string()].into_iter().collect();
        let b: ErrorList<String> = vec!["b".to_string(), "c".to_string()]
            .into_iter()
            .collect();
        let merged = a.merge(b);
        let items: Vec<_> = merged.into_iter().collect();
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_record_collects_only_errors() {
        let mut list: ErrorList<String> = ErrorList::new();
        assert_eq!(list.record(Ok::<_, String>(3)), Some(3));
        assert_eq!(list.record(Err::<i32, _>("nope".to_string())), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_severity_of_aggregate() {
        let mut list = ErrorList::new();
        list.push(TaskError::ignorable(anyhow!("no previous logs")));
        assert_eq!(list.severity(), Severity::Ignorable);

        list.push(TaskError::fatal(anyhow!("command failed")));
        assert_eq!(list.severity(), Severity::Fatal);

        let err = list.into_task_result().unwrap_err();
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(
            err.to_string(),
            "multiple errors:\nno previous logs\ncommand failed"
        );
    }

    #[test]
    fn test_severity_ext() {
        let res: Result<(), std::io::Error> = Err(std::io::Error::other("gone"));
        let err = res.ignorable().unwrap_err();
        assert!(err.is_ignorable());
        assert_eq!(err.to_string(), "gone");
    }
}
