//! Identifier quoting, string literals and naming conventions.
//!
//! Both DDL dialects share the naming conventions; they differ in how
//! identifiers and literals are quoted.

mod keywords;
pub use keywords::is_googlesql_reserved;

/// Longest identifier the database accepts.
pub const MAX_IDENT_LEN: usize = 128;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use spanddl_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use spanddl_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// A GoogleSQL identifier wrapper.
///
/// Display writes the value quoted with backticks. Backticks and
/// backslashes inside the name are escaped with a backslash.
///
/// # Example
/// ```
/// use spanddl_sql::Backticked;
/// assert_eq!(format!("{}", Backticked("singers")), "`singers`");
/// assert_eq!(format!("{}", Backticked("we`ird")), "`we\\`ird`");
/// ```
pub struct Backticked<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Backticked<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`")?;
        for c in self.0.as_ref().chars() {
            match c {
                '`' => write!(f, "\\`")?,
                '\\' => write!(f, "\\\\")?,
                c => write!(f, "{}", c)?,
            }
        }
        write!(f, "`")
    }
}

/// Escape a string literal for the PostgreSQL dialect.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Escape a string literal for the GoogleSQL dialect.
///
/// GoogleSQL string literals use backslash escapes. The literal is written
/// with double quotes, which is how option values are usually spelled.
///
/// ```
/// assert_eq!(spanddl_sql::escape_googlesql_string("bit_reversed_positive"), "\"bit_reversed_positive\"");
/// assert_eq!(spanddl_sql::escape_googlesql_string("a\"b"), "\"a\\\"b\"");
/// ```
pub fn escape_googlesql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes identifiers to avoid issues with reserved keywords like
/// `user`, `order`, `table`, `group`, etc. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote a GoogleSQL identifier with backticks.
pub fn quote_googlesql_ident(name: &str) -> String {
    format!("{}", Backticked(name))
}

/// Write a GoogleSQL identifier bare when that is legal, quoted otherwise.
///
/// Sequence names inside `GET_NEXT_SEQUENCE_VALUE(SEQUENCE ...)` are written
/// bare, which only works for plain names that are not reserved words.
///
/// ```
/// use spanddl_sql::googlesql_ident;
/// assert_eq!(googlesql_ident("singers_seq"), "singers_seq");
/// assert_eq!(googlesql_ident("order"), "`order`");
/// assert_eq!(googlesql_ident("my-seq"), "`my-seq`");
/// ```
pub fn googlesql_ident(name: &str) -> String {
    if is_plain_ident(name) && !is_googlesql_reserved(name) {
        name.to_string()
    } else {
        quote_googlesql_ident(name)
    }
}

fn is_plain_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip one layer of identifier quoting, in either dialect.
///
/// Unquoted names are returned unchanged.
///
/// ```
/// use spanddl_sql::unquote_ident;
/// assert_eq!(unquote_ident("\"bla\"\"h\""), "bla\"h");
/// assert_eq!(unquote_ident("`we\\`ird`"), "we`ird");
/// assert_eq!(unquote_ident("plain"), "plain");
/// ```
pub fn unquote_ident(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let inner = &s[1..s.len() - 1];
        return inner.replace("\"\"", "\"");
    }
    if s.len() >= 2 && s.starts_with('`') && s.ends_with('`') {
        let inner = &s[1..s.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    s.to_string()
}

/// Name of the foreign key from `child` to `parent`.
///
/// ```
/// assert_eq!(spanddl_sql::foreign_key_name("singers", "albums"), "fk_singers_albums");
/// ```
pub fn foreign_key_name(parent: &str, child: &str) -> String {
    cap_ident(&format!("fk_{}_{}", parent, child))
}

/// Name of the backing sequence for a table's auto-increment column.
///
/// ```
/// assert_eq!(spanddl_sql::sequence_name("singers"), "singers_seq");
/// ```
pub fn sequence_name(table: &str) -> String {
    cap_ident(&format!("{}_seq", table))
}

/// Name of the index created for a soft-delete column.
///
/// ```
/// assert_eq!(spanddl_sql::soft_delete_index_name("albums", "deleted_at"), "idx_albums_deleted_at");
/// ```
pub fn soft_delete_index_name(table: &str, column: &str) -> String {
    index_name(table, &[column])
}

/// Generate a standard index name for a table and columns.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(spanddl_sql::index_name("singers", &["last_name"]), "idx_singers_last_name");
/// assert_eq!(spanddl_sql::index_name("concerts", &["start_time", "end_time"]), "idx_concerts_start_time_end_time");
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    cap_ident(&format!("idx_{}_{}", table, cols.join("_")))
}

/// Generate a standard unique index name for a table and columns.
///
/// Uses the convention `uq_{table}_{columns}` where columns are joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(spanddl_sql::unique_index_name("bs", &["sha256"]), "uq_bs_sha256");
/// ```
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    cap_ident(&format!("uq_{}_{}", table, cols.join("_")))
}

/// Keep a derived name within [`MAX_IDENT_LEN`].
///
/// Names that fit are returned as-is. Longer names are cut and suffixed with
/// a stable hash of the full name, so two long names sharing a prefix still
/// map to different identifiers.
pub fn cap_ident(name: &str) -> String {
    if name.len() <= MAX_IDENT_LEN {
        return name.to_string();
    }

    let hex = blake3::hash(name.as_bytes()).to_hex().to_string();
    let suffix = &hex[..16];

    // "_" between the kept prefix and the suffix
    let mut len = MAX_IDENT_LEN - suffix.len() - 1;
    while len > 0 && !name.is_char_boundary(len) {
        len -= 1;
    }

    format!("{}_{}", &name[..len], suffix)
}

/// Normalize a SQL expression for comparison.
///
/// Collapses runs of whitespace outside of quoted sections into a single
/// space and trims the ends. Quoted strings and identifiers are kept
/// byte-for-byte.
pub fn normalize_sql_expr(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;

    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_single_quote {
            out.push(ch);
            if ch == '\'' {
                // SQL escapes single quotes by doubling them: ''
                if let Some(next) = chars.next_if_eq(&'\'') {
                    out.push(next);
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if in_double_quote {
            out.push(ch);
            if ch == '"' {
                if let Some(next) = chars.next_if_eq(&'"') {
                    out.push(next);
                } else {
                    in_double_quote = false;
                }
            }
            continue;
        }

        match ch {
            '\'' | '"' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(ch);
                if ch == '\'' {
                    in_single_quote = true;
                } else {
                    in_double_quote = true;
                }
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cap_ident_short_names_untouched() {
        assert_eq!(cap_ident("fk_singers_albums"), "fk_singers_albums");
    }

    #[test]
    fn test_cap_ident_long_names_are_stable() {
        let long = format!("idx_{}_deleted_at", "t".repeat(200));
        let capped = cap_ident(&long);
        assert_eq!(capped.len(), MAX_IDENT_LEN);
        assert_eq!(capped, cap_ident(&long));

        let other = format!("idx_{}_created_at", "t".repeat(200));
        assert_ne!(capped, cap_ident(&other));
    }

    #[test]
    fn test_normalize_collapses_whitespace_outside_quotes() {
        assert_eq!(
            normalize_sql_expr("  concat(a,\n   ' x  y ',  b) "),
            "concat(a, ' x  y ', b)"
        );
        assert_eq!(normalize_sql_expr("'it''s  here'"), "'it''s  here'");
    }

    #[test]
    fn test_googlesql_reserved_words_are_quoted() {
        assert_eq!(googlesql_ident("select"), "`select`");
        assert_eq!(googlesql_ident("_private"), "_private");
        assert_eq!(googlesql_ident("1abc"), "`1abc`");
    }

    #[test]
    fn snapshot_literals() {
        insta::assert_snapshot!(
            format!("{} {}", Lit("bit_reversed_positive"), escape_googlesql_string("it's")),
            @r#"'bit_reversed_positive' "it's""#
        );
    }

    proptest! {
        #[test]
        fn quoting_round_trips(name in "[a-zA-Z_\"`\\\\ ]{1,24}") {
            prop_assert_eq!(unquote_ident(&quote_ident(&name)), name.clone());
            prop_assert_eq!(unquote_ident(&quote_googlesql_ident(&name)), name);
        }
    }
}
