//! Shell quoting (§9 design note): one utility, used uniformly on every
//! template-substituted and classic-invocation argument, so quoting
//! rules never drift between the two call sites.

/// Quote a single value for POSIX shell interpretation. `None` quotes
/// to the literal string `"None"` (unquoted) rather than an empty
/// string, preserving positional argument semantics in classic
/// four-positional handler invocations.
pub fn quote_value(value: Option<&str>) -> String {
    match value {
        Some(s) => shell_words::quote(s).into_owned(),
        None => "None".to_string(),
    }
}

/// Quote a whole argv for display/logging as a single shell line.
pub fn quote_argv<I, S>(argv: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    shell_words::join(argv.into_iter().map(|s| s.as_ref().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_value_quotes_without_surprises() {
        assert_eq!(quote_value(Some("hello")), "hello");
    }

    #[test]
    fn value_with_spaces_is_quoted() {
        assert_eq!(quote_value(Some("hello world")), "'hello world'");
    }

    #[test]
    fn none_quotes_to_literal_none() {
        assert_eq!(quote_value(None), "None");
    }

    #[test]
    fn argv_joins_with_quoting() {
        let joined = quote_argv(["echo", "hello world", "a'b"]);
        assert!(joined.contains("echo"));
        assert!(joined.contains("'hello world'"));
    }
}
