//! Portable bind-variable placeholders.
//!
//! Statements may name their bind variables `:name` (or `:1`, `:2`, ...).
//! Before execution the placeholders are rewritten to the back end's own
//! syntax: `$n` for PostgreSQL, `?` for MySQL and SQLite.
//!
//! The scanner never looks inside string literals, quoted identifiers,
//! comments or dollar-quoted bodies, and leaves `::` casts and `:=`
//! assignments alone. Backslash escapes are honoured where the back end uses
//! them: every MySQL string, and PostgreSQL `E'...'` strings. MySQL `#` line
//! comments are skipped too. Statements without `:name` placeholders are passed
//! through untouched, so native `?` / `$1` placeholders keep working with
//! positional parameters.

use crate::error::{DbError, DbResult};
use crate::models::{Bind, BindVars, DatabaseType, Params, QueryParam};

/// A piece of scanned SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Sql(&'a str),
    /// Placeholder name without the leading colon
    Placeholder(&'a str),
}

/// SQL rewritten for a back end, with the values to bind in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

#[derive(Clone)]
enum State {
    Normal,
    /// `escapes`: a backslash escapes the next byte
    SingleQuoted { escapes: bool },
    DoubleQuoted { escapes: bool },
    Backtick,
    LineComment,
    BlockComment,
    DollarQuoted(String),
}

/// Identifier bytes. Non-ASCII bytes count, so names like `:név` stay whole.
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || !b.is_ascii()
}

/// PostgreSQL escape string: `E'...'` with the `E` not ending an identifier.
fn is_escape_string_start(bytes: &[u8], quote: usize) -> bool {
    quote > 0
        && matches!(bytes[quote - 1], b'E' | b'e')
        && (quote < 2 || !is_ident_byte(bytes[quote - 2]))
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

fn follows_operand(bytes: &[u8], idx: usize) -> bool {
    idx > 0 && (is_ident_byte(bytes[idx - 1]) || bytes[idx - 1] == b']')
}

/// `$tag$` or `$$` opening at `start`; returns the tag and the index of the
/// closing `$` of the opener.
fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    // "$1" is a native placeholder, not a tag
    if bytes.get(start + 1).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        if !is_ident_byte(bytes[idx]) {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    bytes[idx + 1..].starts_with(tag.as_bytes()) && bytes.get(end) == Some(&b'$')
}

/// Split SQL into plain text and `:name` placeholders.
pub(crate) fn tokenize(sql: &str, db_type: DatabaseType) -> Vec<Segment<'_>> {
    let mysql = db_type == DatabaseType::MySQL;
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut state = State::Normal;
    let mut pending = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match &state {
            State::Normal => match b {
                b'\'' => {
                    let escapes = match db_type {
                        DatabaseType::MySQL => true,
                        DatabaseType::PostgreSQL => is_escape_string_start(bytes, idx),
                        DatabaseType::SQLite => false,
                    };
                    state = State::SingleQuoted { escapes };
                    idx += 1;
                }
                b'"' => {
                    state = State::DoubleQuoted { escapes: mysql };
                    idx += 1;
                }
                b'`' => {
                    state = State::Backtick;
                    idx += 1;
                }
                b'-' if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 2;
                }
                b'#' if mysql => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'/' if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment;
                    idx += 2;
                }
                b'$' => match try_start_dollar_quote(bytes, idx) {
                    Some((tag, end)) => {
                        state = State::DollarQuoted(tag);
                        idx = end + 1;
                    }
                    None => idx += 1,
                },
                b':' => match bytes.get(idx + 1) {
                    // cast or assignment
                    Some(b':') | Some(b'=') => idx += 2,
                    // array slices like arr[lo:hi] follow an identifier
                    Some(&next) if is_ident_byte(next) && !follows_operand(bytes, idx) => {
                        let mut end = idx + 1;
                        while end < bytes.len() && is_ident_byte(bytes[end]) {
                            end += 1;
                        }
                        if pending < idx {
                            segments.push(Segment::Sql(&sql[pending..idx]));
                        }
                        segments.push(Segment::Placeholder(&sql[idx + 1..end]));
                        idx = end;
                        pending = end;
                    }
                    _ => idx += 1,
                },
                _ => idx += 1,
            },
            State::SingleQuoted { escapes } => {
                // '' escapes close and reopen, which needs no special case
                if b == b'\\' && *escapes {
                    idx += 2;
                    continue;
                }
                if b == b'\'' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::DoubleQuoted { escapes } => {
                if b == b'\\' && *escapes {
                    idx += 2;
                    continue;
                }
                if b == b'"' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::Backtick => {
                if b == b'`' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::BlockComment => {
                if is_block_comment_end(bytes, idx) {
                    state = State::Normal;
                    idx += 2;
                } else {
                    idx += 1;
                }
            }
            State::DollarQuoted(tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 2;
                    state = State::Normal;
                } else {
                    idx += 1;
                }
            }
        }
    }

    if pending < bytes.len() {
        segments.push(Segment::Sql(&sql[pending..]));
    }
    segments
}

/// Distinct placeholder names in order of first appearance.
pub(crate) fn placeholder_names<'a>(segments: &[Segment<'a>]) -> Vec<&'a str> {
    let mut names: Vec<&'a str> = Vec::new();
    for segment in segments {
        if let Segment::Placeholder(name) = *segment {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Reassemble SQL, replacing each placeholder occurrence.
pub(crate) fn render<F>(segments: &[Segment<'_>], mut placeholder: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Sql(text) => out.push_str(text),
            Segment::Placeholder(name) => out.push_str(&placeholder(name)),
        }
    }
    out
}

/// Match supplied values to placeholder names.
///
/// Positional values bind to distinct names in first-appearance order, so
/// `:id` used twice consumes one value.
pub(crate) fn resolve_values<'p>(
    names: &[&str],
    params: &'p Params,
) -> DbResult<Vec<&'p QueryParam>> {
    match params {
        Params::Positional(values) => {
            if values.len() != names.len() {
                return Err(DbError::invalid_input(format!(
                    "Statement has {} distinct placeholder(s) but {} positional value(s) were supplied",
                    names.len(),
                    values.len()
                )));
            }
            Ok(values.iter().collect())
        }
        Params::Named(values) => {
            if let Some(unknown) = values.keys().find(|k| !names.contains(&k.as_str())) {
                return Err(DbError::invalid_input(format!(
                    "Named parameter '{unknown}' does not appear in the statement"
                )));
            }
            names
                .iter()
                .map(|name| {
                    values.get(*name).ok_or_else(|| {
                        DbError::invalid_input(format!("Missing value for placeholder :{name}"))
                    })
                })
                .collect()
        }
    }
}

/// Match procedure binds to placeholder names, like [`resolve_values`].
pub(crate) fn resolve_binds<'b>(names: &[&str], binds: &'b BindVars) -> DbResult<Vec<&'b Bind>> {
    match binds {
        BindVars::Positional(list) => {
            if list.len() != names.len() {
                return Err(DbError::invalid_input(format!(
                    "Call has {} distinct placeholder(s) but {} positional bind(s) were supplied",
                    names.len(),
                    list.len()
                )));
            }
            Ok(list.iter().collect())
        }
        BindVars::Named(list) => {
            if let Some((unknown, _)) = list.iter().find(|(k, _)| !names.contains(&k.as_str())) {
                return Err(DbError::invalid_input(format!(
                    "Bind '{unknown}' does not appear in the call"
                )));
            }
            names
                .iter()
                .map(|name| {
                    list.iter()
                        .find(|(k, _)| k.as_str() == *name)
                        .map(|(_, bind)| bind)
                        .ok_or_else(|| {
                            DbError::invalid_input(format!("Missing bind for placeholder :{name}"))
                        })
                })
                .collect()
        }
    }
}

/// Rewrite `:name` placeholders for `db_type` and order the values to bind.
pub fn compile(sql: &str, params: &Params, db_type: DatabaseType) -> DbResult<CompiledStatement> {
    let segments = tokenize(sql, db_type);
    let names = placeholder_names(&segments);

    if names.is_empty() {
        return match params {
            Params::Positional(values) => Ok(CompiledStatement {
                sql: sql.to_string(),
                params: values.clone(),
            }),
            Params::Named(values) if values.is_empty() => Ok(CompiledStatement {
                sql: sql.to_string(),
                params: Vec::new(),
            }),
            Params::Named(_) => Err(DbError::invalid_input(
                "Named parameters were supplied but the statement has no :name placeholders",
            )),
        };
    }

    let values = resolve_values(&names, params)?;

    match db_type {
        DatabaseType::PostgreSQL => {
            // A bound NULL carries a type, so NULL is written inline and
            // the server infers it from context
            let (numbered, params): (Vec<&str>, Vec<QueryParam>) = names
                .iter()
                .zip(values)
                .filter(|(_, value)| !value.is_null())
                .map(|(name, value)| (*name, value.clone()))
                .unzip();
            let sql = render(&segments, |name| {
                match numbered.iter().position(|n| *n == name) {
                    Some(idx) => format!("${}", idx + 1),
                    None => "NULL".to_string(),
                }
            });
            Ok(CompiledStatement { sql, params })
        }
        DatabaseType::MySQL | DatabaseType::SQLite => {
            let mut ordered = Vec::new();
            let sql = render(&segments, |name| {
                if let Some(position) = names.iter().position(|n| *n == name) {
                    ordered.push(values[position].clone());
                }
                "?".to_string()
            });
            Ok(CompiledStatement {
                sql,
                params: ordered,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(sql: &str) -> Vec<&str> {
        placeholder_names(&tokenize(sql, DatabaseType::PostgreSQL))
    }

    #[test]
    fn test_tokenize_finds_placeholders() {
        assert_eq!(
            placeholders("SELECT * FROM employees WHERE id = :id AND dept = :dept"),
            vec!["id", "dept"]
        );
        assert_eq!(placeholders("VALUES (:1, :2)"), vec!["1", "2"]);
    }

    #[test]
    fn test_tokenize_skips_literals_and_comments() {
        let sql = "SELECT ':not', \":nor\", `:this` -- :comment\n\
                   FROM t /* :block */ WHERE a = :real";
        assert_eq!(placeholders(sql), vec!["real"]);
    }

    #[test]
    fn test_tokenize_skips_casts_and_assignments() {
        assert_eq!(placeholders("SELECT :v::text, x::int"), vec!["v"]);
        assert_eq!(placeholders("SET @a := 1"), Vec::<&str>::new());
        assert_eq!(placeholders("SELECT arr[1:2], arr[lo:hi] FROM t"), Vec::<&str>::new());
    }

    #[test]
    fn test_tokenize_skips_dollar_quotes() {
        let sql = "DO $body$ BEGIN PERFORM :x; END $body$; SELECT $$:y$$, :z";
        assert_eq!(placeholders(sql), vec!["z"]);
    }

    #[test]
    fn test_tokenize_keeps_native_dollar_placeholders() {
        let segments = tokenize("SELECT $1, $2", DatabaseType::PostgreSQL);
        assert_eq!(segments, vec![Segment::Sql("SELECT $1, $2")]);
    }

    #[test]
    fn test_tokenize_non_ascii_names() {
        let segments = tokenize("SELECT 'héllo', :név, :größe + 1", DatabaseType::PostgreSQL);
        assert_eq!(
            segments,
            vec![
                Segment::Sql("SELECT 'héllo', "),
                Segment::Placeholder("név"),
                Segment::Sql(", "),
                Segment::Placeholder("größe"),
                Segment::Sql(" + 1"),
            ]
        );

        let params = Params::named([("név", "x")]);
        let compiled = compile("SELECT :név", &params, DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.sql, "SELECT ?");
    }

    #[test]
    fn test_tokenize_mysql_backslash_escapes() {
        let names = |sql| placeholder_names(&tokenize(sql, DatabaseType::MySQL));
        assert_eq!(names(r"SELECT 'it\'s :x', :y"), vec!["y"]);
        assert_eq!(names(r#"SELECT "say \":x\"", :y"#), vec!["y"]);
        assert_eq!(names(r"SELECT 'ends with \\', :y"), vec!["y"]);

        let compiled =
            compile(r"SELECT 'it\'s :x'", &Params::default(), DatabaseType::MySQL).unwrap();
        assert_eq!(compiled.sql, r"SELECT 'it\'s :x'");
    }

    #[test]
    fn test_tokenize_postgres_escape_strings() {
        assert_eq!(placeholders(r"SELECT E'it\'s :x', :y"), vec!["y"]);
        assert_eq!(placeholders(r"SELECT e'a\'b :x'"), Vec::<&str>::new());
        // Plain strings treat the backslash as text
        assert_eq!(placeholders(r"SELECT 'c:\', :y"), vec!["y"]);
        // A trailing E on an identifier is not a prefix
        assert_eq!(placeholders(r"SELECT name'\', :y"), vec!["y"]);

        let compiled = compile(
            r"SELECT E'it\'s :x'",
            &Params::default(),
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_tokenize_mysql_hash_comments() {
        let names = |sql| placeholder_names(&tokenize(sql, DatabaseType::MySQL));
        assert_eq!(names("SELECT 1 # note: see :x\nFROM t WHERE a = :a"), vec!["a"]);

        let compiled = compile(
            "SELECT 1 # note: see :x\n",
            &Params::default(),
            DatabaseType::MySQL,
        )
        .unwrap();
        assert_eq!(compiled.sql, "SELECT 1 # note: see :x\n");
    }

    #[test]
    fn test_compile_postgres_inlines_null() {
        let params = Params::named([
            ("a", QueryParam::Int(1)),
            ("n", QueryParam::Null),
            ("b", QueryParam::Int(2)),
        ]);
        let compiled = compile(
            "INSERT INTO t (a, n, b, m) VALUES (:a, :n, :b, :n::int)",
            &params,
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO t (a, n, b, m) VALUES ($1, NULL, $2, NULL::int)"
        );
        assert_eq!(compiled.params, vec![QueryParam::Int(1), QueryParam::Int(2)]);

        // Other back ends still bind it
        let params = Params::named([("n", QueryParam::Null)]);
        let compiled = compile("SELECT :n", &params, DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.params, vec![QueryParam::Null]);
    }

    #[test]
    fn test_compile_postgres_numbers_distinct_names() {
        let params = Params::named([("id", 7i64), ("name", 1i64)]);
        let compiled = compile(
            "SELECT * FROM t WHERE id = :id OR parent = :id OR name = :name",
            &params,
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM t WHERE id = $1 OR parent = $1 OR name = $2"
        );
        assert_eq!(
            compiled.params,
            vec![QueryParam::Int(7), QueryParam::Int(1)]
        );
    }

    #[test]
    fn test_compile_mysql_repeats_values() {
        let params = Params::positional([35295i64, 110]);
        let compiled = compile(
            "SELECT * FROM t WHERE a = :a OR b = :a OR c = :c",
            &params,
            DatabaseType::MySQL,
        )
        .unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE a = ? OR b = ? OR c = ?");
        assert_eq!(
            compiled.params,
            vec![
                QueryParam::Int(35295),
                QueryParam::Int(35295),
                QueryParam::Int(110)
            ]
        );
    }

    #[test]
    fn test_compile_passthrough_native_placeholders() {
        let params = Params::positional([1i64, 2]);
        let compiled = compile("SELECT ? + ?", &params, DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.sql, "SELECT ? + ?");
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn test_compile_count_mismatch() {
        let params = Params::positional([1i64]);
        let err = compile("SELECT :a, :b", &params, DatabaseType::SQLite).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_compile_missing_and_unknown_named() {
        let params = Params::named([("a", 1i64)]);
        let err = compile("SELECT :a, :b", &params, DatabaseType::SQLite).unwrap_err();
        assert!(err.to_string().contains(":b"));

        let params = Params::named([("a", 1i64), ("zzz", 2i64)]);
        let err = compile("SELECT :a", &params, DatabaseType::SQLite).unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }

    #[test]
    fn test_compile_named_without_placeholders() {
        let params = Params::named([("a", 1i64)]);
        assert!(compile("SELECT 1", &params, DatabaseType::PostgreSQL).is_err());
        let empty = Params::named(Vec::<(String, i64)>::new());
        let compiled = compile("SELECT 1", &empty, DatabaseType::PostgreSQL).unwrap();
        assert_eq!(compiled.sql, "SELECT 1");
    }

    #[test]
    fn test_resolve_binds_by_name_and_position() {
        use crate::models::BindType;

        let names = ["emp", "salary"];
        let named = BindVars::named([
            ("salary", Bind::output(BindType::Float)),
            ("emp", Bind::input(101i64)),
        ]);
        let resolved = resolve_binds(&names, &named).unwrap();
        assert_eq!(resolved[0], &Bind::input(101i64));
        assert_eq!(resolved[1], &Bind::output(BindType::Float));

        let positional = BindVars::Positional(vec![Bind::input(1i64)]);
        assert!(resolve_binds(&names, &positional).is_err());

        let missing = BindVars::named([("emp", Bind::input(1i64))]);
        let err = resolve_binds(&names, &missing).unwrap_err();
        assert!(err.to_string().contains(":salary"));
    }
}
