//! Text appended to the screen when the child exits

/// Describe how the child exited
///
/// `exit_code` is the exit status for a normal exit and the negated signal
/// number when the child was killed by a signal.
pub fn exit_description(exit_code: i32) -> String {
    let mut description = String::from("\r\n[Process completed");
    if exit_code > 0 {
        description.push_str(&format!(" (code {exit_code})"));
    } else if exit_code < 0 {
        description.push_str(&format!(" (signal {})", exit_code.unsigned_abs()));
    }
    description.push_str(" - press Enter]");
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_exit() {
        assert_eq!(exit_description(0), "\r\n[Process completed - press Enter]");
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(
            exit_description(2),
            "\r\n[Process completed (code 2) - press Enter]"
        );
    }

    #[test]
    fn test_killed_by_signal() {
        assert_eq!(
            exit_description(-9),
            "\r\n[Process completed (signal 9) - press Enter]"
        );
    }
}
