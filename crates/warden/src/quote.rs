//! Rendering of argument vectors for log output.
//!
//! Commands are always executed from their argument vector; the quoted form
//! only exists so operators can copy a logged command line into a shell.

use std::ffi::OsStr;

/// Joins `args` into one shell-safe line.
///
/// Arguments that are not valid UTF-8 are rendered lossily.
pub fn shell_quote_args<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    shell_words::join(
        args.into_iter()
            .map(|arg| arg.as_ref().to_string_lossy().into_owned()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain(&["echo", "hi"], "echo hi")]
    #[case::spaces(&["touch", "my file"], "touch 'my file'")]
    #[case::quote(&["echo", "it's"], r"echo 'it'\''s'")]
    #[case::expansion(&["echo", "$HOME"], "echo '$HOME'")]
    #[case::empty(&["printf", ""], "printf ''")]
    fn quotes_arguments(#[case] args: &[&str], #[case] expected: &str) {
        assert_eq!(shell_quote_args(args), expected);
    }
}
