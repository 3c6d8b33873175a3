//! Response type for shell request results.

use std::time::Duration;

/// Response from one request run on a pooled shell.
#[derive(Debug, Clone)]
pub struct Response {
    /// The command line that was sent.
    pub command: String,

    /// The command output (normalized - echoed command line removed, `\r\n`
    /// folded to `\n`).
    pub result: String,

    /// The raw output between the previous prompt and the next one.
    pub raw_result: String,

    /// The prompt marker that ended the output.
    pub prompt: String,

    /// Time from sending the command to seeing the prompt.
    pub elapsed: Duration,

    /// Failure message if the output matched a failure pattern.
    pub failure_message: Option<String>,
}

impl Response {
    /// Create a new successful response.
    pub fn new(
        command: impl Into<String>,
        result: impl Into<String>,
        raw_result: impl Into<String>,
        prompt: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            result: result.into(),
            raw_result: raw_result.into(),
            prompt: prompt.into(),
            elapsed,
            failure_message: None,
        }
    }

    /// Build a response from the bytes a shell produced for `command`.
    ///
    /// The first pattern in `failed_when_contains` found in the normalized
    /// output becomes the failure message.
    pub(crate) fn from_output(
        command: &str,
        raw: &[u8],
        prompt: &str,
        elapsed: Duration,
        failed_when_contains: &[String],
    ) -> Self {
        let raw_result = String::from_utf8_lossy(raw).into_owned();
        let result = normalize_output(&raw_result, command);
        let failure_message = failed_when_contains
            .iter()
            .find(|pattern| result.contains(pattern.as_str()))
            .cloned();

        Self {
            command: command.to_string(),
            result,
            raw_result,
            prompt: prompt.to_string(),
            elapsed,
            failure_message,
        }
    }

    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        self.failure_message.is_none()
    }

    /// Get the result lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.result.lines()
    }

    /// Check if the result contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.result.contains(pattern)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.result)
    }
}

/// Fold terminal line endings and drop the echoed command line.
fn normalize_output(raw: &str, command: &str) -> String {
    let folded = raw.replace("\r\n", "\n");
    let body = match folded.split_once('\n') {
        Some((first, rest)) if first.trim_end_matches('\r') == command.trim_end() => rest,
        None if folded.trim_end_matches('\r') == command.trim_end() => "",
        _ => folded.as_str(),
    };
    body.strip_suffix('\n').unwrap_or(body).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> Vec<String> {
        vec!["command not found".to_string()]
    }

    #[test]
    fn test_normalize_strips_echo() {
        assert_eq!(normalize_output("echo hi\r\nhi\r\n", "echo hi"), "hi");
        assert_eq!(normalize_output("ls\r\na\r\nb\r\n", "ls"), "a\nb");
        assert_eq!(normalize_output("true\r\n", "true"), "");
        assert_eq!(normalize_output("", "true"), "");
    }

    #[test]
    fn test_normalize_keeps_unechoed_output() {
        // Output from a terminal with echo disabled.
        assert_eq!(normalize_output("hi\r\n", "echo hi"), "hi");
        assert_eq!(normalize_output("line\r\n\r\n", "cmd"), "line\n");
    }

    #[test]
    fn test_from_output_success() {
        let response = Response::from_output(
            "echo hi",
            b"echo hi\r\nhi\r\n",
            "PROMPT> ",
            Duration::from_millis(3),
            &patterns(),
        );
        assert!(response.is_success());
        assert_eq!(response.result, "hi");
        assert_eq!(response.raw_result, "echo hi\r\nhi\r\n");
        assert_eq!(response.prompt, "PROMPT> ");
        assert_eq!(response.to_string(), "hi");
    }

    #[test]
    fn test_from_output_failure_pattern() {
        let response = Response::from_output(
            "nosuchcmd",
            b"nosuchcmd\r\nsh: 1: nosuchcmd: command not found\r\n",
            "PROMPT> ",
            Duration::ZERO,
            &patterns(),
        );
        assert!(!response.is_success());
        assert_eq!(response.failure_message.as_deref(), Some("command not found"));
        assert!(response.contains("nosuchcmd"));
        assert_eq!(response.lines().count(), 1);
    }

    #[test]
    fn test_from_output_lossy_utf8() {
        let response =
            Response::from_output("cat", b"cat\r\n\xff\xfe\r\n", "$ ", Duration::ZERO, &[]);
        assert!(response.result.contains('\u{fffd}'));
    }
}
