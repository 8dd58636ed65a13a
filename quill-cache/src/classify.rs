//! Table classification and entity id extraction for free-form SQL.
//!
//! The classifier is a lexical scan, not a parser. It answers three
//! questions about a statement: is it a read or a write, which table does it
//! depend on (or modify), and which entity ids can be read off its bound
//! arguments. Anything it is unsure about comes back as unknown, and the
//! store treats an unknown read as uncacheable.

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use quill_core::{CachePayload, EntityId, Value};
use regex::Regex;

// ============================================================================
// PATTERNS
// ============================================================================

/// Optionally schema-qualified, optionally quoted identifier. Group 1 is the
/// unqualified name.
macro_rules! ident {
    () => {
        r#"(?:"?[A-Za-z_][A-Za-z0-9_$]*"?\s*\.\s*)?"?([A-Za-z_][A-Za-z0-9_$]*)"?"#
    };
}

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("Invalid literal regex"));

static COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").expect("Invalid comment regex"));

static LEADING_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s(]*([A-Za-z]+)").expect("Invalid keyword regex"));

static MODIFYING_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|merge|truncate)\b").expect("Invalid verb regex")
});

static READ_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(r"(?i)\b(?:from|join)\s+(?:only\s+)?", ident!()))
        .expect("Invalid source regex")
});

static TABLE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(r"(?i)^[\s(]*table\s+(?:only\s+)?", ident!()))
        .expect("Invalid table statement regex")
});

static WRITE_TARGETS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        concat!(r"(?i)\binsert\s+into\s+", ident!()),
        concat!(r"(?i)\bupdate\s+(?:only\s+)?", ident!()),
        concat!(r"(?i)\bdelete\s+from\s+(?:only\s+)?", ident!()),
        concat!(r"(?i)\bmerge\s+into\s+", ident!()),
        concat!(r"(?i)\btruncate\s+(?:table\s+)?(?:only\s+)?", ident!()),
        concat!(
            r"(?i)\b(?:alter|drop|create)\s+(?:(?:temp|temporary|unlogged)\s+)?table\s+",
            r"(?:if\s+(?:not\s+)?exists\s+)?(?:only\s+)?",
            ident!()
        ),
        concat!(
            r"(?is)\bcreate\s+(?:unique\s+)?index\b.*?\bon\s+(?:only\s+)?",
            ident!()
        ),
        concat!(r"(?i)\bcopy\s+", ident!()),
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("Invalid write target regex"))
    .collect()
});

/// `column = $n`, optionally qualified by a table alias.
static PREDICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:\b[A-Za-z_][A-Za-z0-9_]*\.)?"?\b([A-Za-z_][A-Za-z0-9_]*)"?\s*=\s*\$(\d+)"#)
        .expect("Invalid predicate regex")
});

/// Words, quoted identifiers and the punctuation that shapes a FROM list.
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[A-Za-z_][A-Za-z0-9_$]*|"[^"]*"|[(),;]"#).expect("Invalid token regex")
});

/// Keywords that close a FROM list at the depth it was opened.
const FROM_LIST_END: &[&str] = &[
    "where", "group", "having", "window", "order", "limit", "offset", "fetch", "for", "union",
    "intersect", "except", "returning",
];

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_$]*").expect("Invalid word regex"));

/// Words a target pattern can capture that are never table names, for
/// example the `SET` in `ON CONFLICT ... DO UPDATE SET`.
const NOT_A_TABLE: &[&str] = &["set", "skip", "nowait", "of", "where", "select", "values"];

// ============================================================================
// TYPES
// ============================================================================

/// Configuration for table classification and entity extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Tables whose reads may be cached.
    pub known_tables: Vec<String>,
    /// Columns whose values identify an entity.
    pub id_columns: Vec<String>,
    /// Columns that scope a list to an owning entity.
    pub scope_columns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            known_tables: ["guilds", "users", "prefixes", "tags", "afk"]
                .into_iter()
                .map(String::from)
                .collect(),
            id_columns: vec!["id".to_string()],
            scope_columns: ["guild_id", "user_id", "owner_id"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ClassifierConfig {
    /// Allow one more table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.known_tables.push(table.into());
        self
    }

    /// Replace the allow-list.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the identifier columns.
    pub fn with_id_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Whether a statement reads, writes, or does neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
    /// Transaction control, session settings and anything unrecognized.
    Other,
}

/// Which argument pattern produced the entity ids of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// `id = $n`.
    PrimaryKey,
    /// Two or more `col = $n` predicates; ids joined with `:`.
    Composite,
    /// A single predicate on a scope column such as `guild_id`.
    Scoped,
    Unrecognized,
}

/// Result of classifying one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: StatementKind,
    /// For a read, the single table it depends on. For a write, every table
    /// it may have modified. Empty means unknown.
    pub tables: Vec<String>,
    /// Entity ids derived from the bound arguments (reads only).
    pub entity_ids: Vec<EntityId>,
    pub shape: QueryShape,
}

impl Classification {
    /// The table a read depends on, if known.
    pub fn table(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }

    pub fn is_known(&self) -> bool {
        !self.tables.is_empty()
    }

    fn unknown(kind: StatementKind) -> Self {
        Self {
            kind,
            tables: Vec::new(),
            entity_ids: Vec::new(),
            shape: QueryShape::Unrecognized,
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Infers table and entity information from SQL text.
#[derive(Debug, Clone)]
pub struct TableClassifier {
    config: ClassifierConfig,
    known: HashSet<String>,
}

impl Default for TableClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl TableClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let known = config
            .known_tables
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        Self { config, known }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn is_known_table(&self, table: &str) -> bool {
        self.known.contains(&table.to_ascii_lowercase())
    }

    /// Decide whether `sql` reads, writes, or neither.
    pub fn statement_kind(sql: &str) -> StatementKind {
        kind_of(&scrub(sql))
    }

    /// Classify `sql` executed with `params`.
    pub fn classify(&self, sql: &str, params: &[Value]) -> Classification {
        let text = scrub(sql);
        match kind_of(&text) {
            StatementKind::Read => self.classify_read(&text, params),
            StatementKind::Write => self.classify_write(&text),
            StatementKind::Other => Classification::unknown(StatementKind::Other),
        }
    }

    fn classify_read(&self, text: &str, params: &[Value]) -> Classification {
        if has_comma_join(text) {
            return Classification::unknown(StatementKind::Read);
        }

        let mut sources: BTreeSet<String> = READ_SOURCE
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect();
        if let Some(name) = TABLE_STATEMENT.captures(text).and_then(|c| c.get(1)) {
            sources.insert(name.as_str().to_ascii_lowercase());
        }

        let mut sources = sources.into_iter();
        let table = match (sources.next(), sources.next()) {
            (Some(table), None) if self.known.contains(&table) => table,
            _ => return Classification::unknown(StatementKind::Read),
        };

        let (shape, entity_ids) = self.argument_entities(text, params);
        Classification {
            kind: StatementKind::Read,
            tables: vec![table],
            entity_ids,
            shape,
        }
    }

    fn classify_write(&self, text: &str) -> Classification {
        let mut targets: Vec<String> = Vec::new();
        for pattern in WRITE_TARGETS.iter() {
            for name in pattern.captures_iter(text).filter_map(|c| c.get(1)) {
                let name = name.as_str().to_ascii_lowercase();
                if !NOT_A_TABLE.contains(&name.as_str()) && !targets.contains(&name) {
                    targets.push(name);
                }
            }
        }

        if targets.is_empty() {
            // Target not located: fall back to every known table mentioned.
            for word in WORD.find_iter(text) {
                let word = word.as_str().to_ascii_lowercase();
                if self.known.contains(&word) && !targets.contains(&word) {
                    targets.push(word);
                }
            }
        }

        Classification {
            kind: StatementKind::Write,
            tables: targets,
            entity_ids: Vec::new(),
            shape: QueryShape::Unrecognized,
        }
    }

    /// Entity ids implied by `col = $n` predicates.
    fn argument_entities(&self, text: &str, params: &[Value]) -> (QueryShape, Vec<EntityId>) {
        let mut predicates: Vec<(String, &Value)> = Vec::new();
        for caps in PREDICATE.captures_iter(text) {
            let (Some(column), Some(index)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Some(value) = index
                .as_str()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| params.get(i))
            else {
                continue;
            };
            let column = column.as_str().to_ascii_lowercase();
            if !predicates.iter().any(|(c, _)| *c == column) {
                predicates.push((column, value));
            }
        }

        let is_id = |column: &str| self.config.id_columns.iter().any(|c| c == column);
        let is_scope = |column: &str| self.config.scope_columns.iter().any(|c| c == column);

        if let Some((_, value)) = predicates.iter().find(|(c, _)| is_id(c)) {
            if let Some(id) = EntityId::from_value(value) {
                return (QueryShape::PrimaryKey, vec![id]);
            }
        }

        match predicates.as_slice() {
            [] => (QueryShape::Unrecognized, Vec::new()),
            [(column, value)] if is_scope(column) => match EntityId::from_value(value) {
                Some(id) => (QueryShape::Scoped, vec![id]),
                None => (QueryShape::Unrecognized, Vec::new()),
            },
            [_] => (QueryShape::Unrecognized, Vec::new()),
            many => match EntityId::composite_from_values(many.iter().map(|(_, v)| *v)) {
                Some(id) => (QueryShape::Composite, vec![id]),
                None => (QueryShape::Unrecognized, Vec::new()),
            },
        }
    }

    /// Entity ids carried by the identifier columns of a result.
    pub fn extract_entities(&self, payload: &CachePayload) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = Vec::new();
        for row in payload.rows() {
            for column in &self.config.id_columns {
                if let Some(id) = row.get(column).and_then(EntityId::from_value) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        ids
    }
}

/// Blank out string literals and drop comments so neither can be mistaken
/// for SQL structure.
fn scrub(sql: &str) -> String {
    let without_literals = STRING_LITERAL.replace_all(sql, "''");
    COMMENT.replace_all(&without_literals, " ").into_owned()
}

/// Whether any FROM list names more than one source separated by commas,
/// e.g. `FROM users u, tags t`. Commas nested in parentheses belong to a
/// subquery or function call and do not count.
fn has_comma_join(text: &str) -> bool {
    let mut depth = 0usize;
    let mut open: Vec<usize> = Vec::new();
    let mut previous = String::new();

    for token in TOKEN.find_iter(text) {
        let token = token.as_str().to_ascii_lowercase();
        match token.as_str() {
            "(" => depth += 1,
            ")" => {
                depth = depth.saturating_sub(1);
                open.retain(|&d| d <= depth);
            }
            "," if open.last() == Some(&depth) => return true,
            ";" => open.clear(),
            // `a IS DISTINCT FROM b` is a comparison, not a FROM list.
            "from" if previous != "distinct" => open.push(depth),
            word if FROM_LIST_END.contains(&word) && open.last() == Some(&depth) => {
                open.pop();
            }
            _ => {}
        }
        previous = token;
    }
    false
}

fn kind_of(text: &str) -> StatementKind {
    let Some(keyword) = LEADING_KEYWORD.captures(text).and_then(|c| c.get(1)) else {
        return StatementKind::Other;
    };
    match keyword.as_str().to_ascii_lowercase().as_str() {
        "select" | "values" | "show" | "table" => StatementKind::Read,
        "with" | "explain" => {
            if MODIFYING_VERB.is_match(text) {
                StatementKind::Write
            } else {
                StatementKind::Read
            }
        }
        "insert" | "update" | "delete" | "merge" | "truncate" | "create" | "alter" | "drop"
        | "copy" => StatementKind::Write,
        _ => StatementKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Row;

    fn classifier() -> TableClassifier {
        TableClassifier::default()
    }

    #[test]
    fn test_statement_kinds() {
        assert_eq!(TableClassifier::statement_kind("SELECT 1"), StatementKind::Read);
        assert_eq!(TableClassifier::statement_kind("  (select * from users)"), StatementKind::Read);
        assert_eq!(
            TableClassifier::statement_kind("DELETE FROM tags WHERE id = $1 RETURNING id"),
            StatementKind::Write
        );
        assert_eq!(
            TableClassifier::statement_kind("WITH t AS (SELECT 1) SELECT * FROM t"),
            StatementKind::Read
        );
        assert_eq!(
            TableClassifier::statement_kind(
                "WITH gone AS (DELETE FROM afk WHERE guild_id = $1 RETURNING *) SELECT count(*) FROM gone"
            ),
            StatementKind::Write
        );
        assert_eq!(TableClassifier::statement_kind("BEGIN"), StatementKind::Other);
        assert_eq!(TableClassifier::statement_kind(""), StatementKind::Other);
    }

    #[test]
    fn test_primary_key_read() {
        let c = classifier().classify("SELECT * FROM users WHERE id = $1", &[Value::Int(1)]);
        assert_eq!(c.kind, StatementKind::Read);
        assert_eq!(c.table(), Some("users"));
        assert_eq!(c.shape, QueryShape::PrimaryKey);
        assert_eq!(c.entity_ids, vec![EntityId::new("1")]);
    }

    #[test]
    fn test_composite_read() {
        let c = classifier().classify(
            "SELECT prefix FROM prefixes WHERE entity_type = $1 AND entity_id = $2",
            &[Value::from("guild"), Value::Int(42)],
        );
        assert_eq!(c.table(), Some("prefixes"));
        assert_eq!(c.shape, QueryShape::Composite);
        assert_eq!(c.entity_ids, vec![EntityId::new("guild:42")]);
    }

    #[test]
    fn test_scoped_list_read() {
        let c = classifier().classify(
            "SELECT * FROM tags WHERE guild_id = $1 ORDER BY name",
            &[Value::Int(7)],
        );
        assert_eq!(c.table(), Some("tags"));
        assert_eq!(c.shape, QueryShape::Scoped);
        assert_eq!(c.entity_ids, vec![EntityId::new("7")]);
    }

    #[test]
    fn test_single_unscoped_predicate_is_unrecognized() {
        let c = classifier().classify("SELECT * FROM tags WHERE name = $1", &[Value::from("x")]);
        assert_eq!(c.table(), Some("tags"));
        assert_eq!(c.shape, QueryShape::Unrecognized);
        assert!(c.entity_ids.is_empty());
    }

    #[test]
    fn test_schema_and_quotes_are_stripped() {
        let c = classifier().classify(r#"SELECT * FROM public."users" u WHERE u.id = $1"#, &[Value::Int(3)]);
        assert_eq!(c.table(), Some("users"));
        assert_eq!(c.entity_ids, vec![EntityId::new("3")]);
    }

    #[test]
    fn test_join_read_is_unknown() {
        let c = classifier().classify(
            "SELECT t.* FROM tags t JOIN users u ON u.id = t.user_id WHERE u.id = $1",
            &[Value::Int(1)],
        );
        assert_eq!(c.kind, StatementKind::Read);
        assert!(!c.is_known());
    }

    #[test]
    fn test_comma_join_read_is_unknown() {
        let c = classifier().classify(
            "SELECT u.id, t.name FROM users u, tags t WHERE t.user_id = u.id AND u.id = $1",
            &[Value::Int(1)],
        );
        assert_eq!(c.kind, StatementKind::Read);
        assert!(!c.is_known());
        assert!(c.tables.is_empty());

        for sql in [
            "SELECT * FROM users AS u, tags",
            "SELECT * FROM (SELECT * FROM tags) t, users u",
            "SELECT * FROM users u JOIN afk a ON a.user_id = u.id, tags t",
        ] {
            assert!(!classifier().classify(sql, &[]).is_known(), "{sql}");
        }
    }

    #[test]
    fn test_commas_outside_from_list_keep_single_table() {
        for sql in [
            "SELECT id, username FROM users WHERE id IN ($1, $2) ORDER BY id, username",
            "SELECT extract(epoch FROM last_active), id FROM users WHERE id = $1",
            "SELECT * FROM users WHERE id = ANY(ARRAY[$1, $2]) LIMIT 5",
            "SELECT a IS DISTINCT FROM b, id FROM users",
            "SELECT * FROM tags WHERE content = 'x, y'",
        ] {
            assert!(!has_comma_join(&scrub(sql)), "{sql}");
        }
        assert!(classifier()
            .classify("SELECT id, username FROM users WHERE id = $1", &[Value::Int(1)])
            .is_known());
    }

    #[test]
    fn test_unlisted_table_read_is_unknown() {
        let c = classifier().classify("SELECT * FROM audit_log", &[]);
        assert!(!c.is_known());
        assert!(classifier().classify("SELECT now()", &[]).tables.is_empty());
    }

    #[test]
    fn test_literals_and_comments_do_not_leak() {
        let c = classifier().classify(
            "SELECT * FROM tags WHERE content = 'select * from users' -- join afk\n",
            &[],
        );
        assert_eq!(c.table(), Some("tags"));
    }

    #[test]
    fn test_write_targets() {
        let cl = classifier();
        let cases = [
            ("INSERT INTO users (id, username) VALUES ($1, $2)", "users"),
            ("UPDATE tags SET uses = uses + 1 WHERE id = $1", "tags"),
            ("DELETE FROM afk WHERE user_id = $1", "afk"),
            ("TRUNCATE TABLE prefixes", "prefixes"),
            ("CREATE TABLE IF NOT EXISTS guilds (id BIGINT)", "guilds"),
            ("DROP TABLE IF EXISTS public.tags", "tags"),
        ];
        for (sql, table) in cases {
            let c = cl.classify(sql, &[]);
            assert_eq!(c.kind, StatementKind::Write, "{sql}");
            assert_eq!(c.tables, vec![table.to_string()], "{sql}");
        }
    }

    #[test]
    fn test_upsert_does_not_capture_set() {
        let c = classifier().classify(
            "INSERT INTO guilds (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
            &[],
        );
        assert_eq!(c.tables, vec!["guilds".to_string()]);
    }

    #[test]
    fn test_write_fallback_to_mentioned_tables() {
        let c = classifier().classify("WITH x AS (SELECT 1) DELETE", &[]);
        assert_eq!(c.kind, StatementKind::Write);
        assert!(c.tables.is_empty());

        let c = classifier().classify("COPY (SELECT * FROM tags JOIN users USING (id)) TO STDOUT", &[]);
        assert_eq!(c.kind, StatementKind::Write);
        assert_eq!(c.tables, vec!["tags".to_string(), "users".to_string()]);
    }

    #[test]
    fn test_other_statements_are_unknown() {
        let c = classifier().classify("SET search_path TO public", &[]);
        assert_eq!(c.kind, StatementKind::Other);
        assert!(!c.is_known());
    }

    #[test]
    fn test_extract_entities_from_rows() {
        let rows = CachePayload::Rows(vec![
            Row::new().with("id", 1i64).with("name", "a"),
            Row::new().with("id", 2i64).with("name", "b"),
            Row::new().with("id", 1i64).with("name", "dup"),
            Row::new().with("name", "no id"),
        ]);
        assert_eq!(
            classifier().extract_entities(&rows),
            vec![EntityId::new("1"), EntityId::new("2")]
        );
        assert!(classifier()
            .extract_entities(&CachePayload::Scalar(Value::Int(5)))
            .is_empty());
    }

    #[test]
    fn test_custom_config() {
        let cl = TableClassifier::new(ClassifierConfig::default().with_tables(["notes"]));
        assert!(cl.is_known_table("NOTES"));
        assert!(!cl.is_known_table("users"));
        assert_eq!(cl.classify("SELECT * FROM notes", &[]).table(), Some("notes"));
    }
}
