//! Argument quoting for command lines handed to a POSIX shell.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quotes a single argument.
///
/// A leading-dash argument carrying an embedded `=` or space keeps its flag
/// part verbatim and quotes only the value, so `--flag=value` and
/// `-o value` survive as the program expects them. The flag part is only
/// left bare when it is a plain option name (ASCII letters, digits, `-`,
/// `_`, `.`); anything else is quoted whole.
#[must_use]
pub fn quote_argument(arg: &str) -> String {
    if let Some((flag, value)) = arg.split_once('=')
        && is_plain_flag(flag)
    {
        return format!("{flag}={}", escape(Cow::Borrowed(value)));
    }
    if let Some((flag, value)) = arg.split_once(' ')
        && is_plain_flag(flag)
    {
        return format!("{flag} {}", escape(Cow::Borrowed(value)));
    }
    escape(Cow::Borrowed(arg)).into_owned()
}

fn is_plain_flag(flag: &str) -> bool {
    flag.starts_with('-')
        && flag
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Quotes a value as one shell word.
#[must_use]
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}
