//! Query routing heuristics, context assembly, and citation formatting.
//!
//! Three routes exist for a question: verbatim SQL execution, direct
//! count/list answers computed from table metadata, and the retrieval
//! pipeline. The heuristics here only decide the route; execution lives in
//! the service layer.

use serde_json::Value;

use crate::llm::ChatMessage;
use crate::service::types::{HistoryTurn, TableInfo, TablePayload};

/// Answer returned when the owner has nothing indexed yet.
pub(crate) const NO_DOCUMENTS_MESSAGE: &str = "I am unable to answer your question as I do not \
     have access to any documents. Please upload documents first.";

/// Answer returned when retrieval finds nothing relevant.
pub(crate) const NO_HITS_MESSAGE: &str = "I could not find relevant information in the uploaded \
     documents. Try a different query or upload more documents.";

pub(crate) const SYSTEM_PROMPT: &str = "You are Paperquery, an expert document analysis assistant.\n\
     \n\
     IMPORTANT GUIDELINES:\n\
     1. Always cite sources using the bracketed [filename#locator] format shown in the context\n\
     2. For tabular data questions, suggest SQL queries when appropriate\n\
     3. Ask specific clarifying questions when information is insufficient\n\
     4. Only provide information that's directly supported by the retrieved evidence\n\
     5. Format your answers clearly with direct responses to the user's question first";

const SQL_KEYWORDS: [&str; 8] = [
    "SELECT", "FROM", "WHERE", "JOIN", "GROUP BY", "ORDER BY", "HAVING", "LIMIT",
];

const SQL_INDICATORS: [&str; 13] = [
    "list",
    "count",
    "how many",
    "average",
    "sum",
    "total",
    "compare",
    "sort",
    "filter",
    "show me",
    "table",
    "spreadsheet",
    "excel",
];

/// Generic subjects that refer to whole rows rather than a named entity.
const GENERIC_SUBJECTS: [&str; 8] = [
    "items",
    "records",
    "entries",
    "rows",
    "results",
    "all",
    "everything",
    "them",
];

/// Maximum distinct values returned by a list answer.
pub(crate) const LIST_LIMIT: usize = 10;

/// Words that introduce a `column operator value` condition.
const FILTER_KEYWORDS: [&str; 4] = [" where ", " with ", " whose ", " that have "];

/// Whether the query should be executed as SQL verbatim.
///
/// True when the query starts with `SELECT ` or contains at least two
/// distinct SQL keywords.
pub(crate) fn is_sql_query(query: &str) -> bool {
    let upper = query.trim().to_uppercase();
    if upper.starts_with("SELECT ") {
        return true;
    }
    let matches = SQL_KEYWORDS
        .iter()
        .filter(|keyword| upper.contains(*keyword))
        .count();
    matches >= 2
}

/// Whether the question reads like it is about tabular data.
pub(crate) fn leans_tabular(query: &str) -> bool {
    let lower = query.to_lowercase();
    SQL_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}

/// A count or list question resolved against registered tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DirectAnswer {
    /// `SELECT COUNT(*)` over the matched table.
    CountRows {
        /// Table the count runs over.
        table: String,
    },
    /// `SELECT COUNT(DISTINCT col)` over the matched column.
    CountDistinct {
        /// Table owning the column.
        table: String,
        /// Column the distinct count runs over.
        column: String,
    },
    /// `SELECT DISTINCT col ... LIMIT 10` over the matched column.
    ListColumn {
        /// Table owning the column.
        table: String,
        /// Column whose distinct values are listed.
        column: String,
    },
    /// Rows matching an extracted `column operator value` condition.
    FilteredRows {
        /// Table owning the column.
        table: String,
        /// Column the condition applies to.
        column: String,
        /// Canonical comparison operator accepted by the tabular store.
        operator: String,
        /// Unquoted comparison value.
        value: String,
    },
}

impl DirectAnswer {
    /// Render the SQL statement this answer executes. The filtered variant
    /// runs with bound parameters; the rendered text is its display form.
    pub(crate) fn sql(&self) -> String {
        match self {
            Self::CountRows { table } => format!("SELECT COUNT(*) FROM \"{table}\""),
            Self::CountDistinct { table, column } => {
                format!("SELECT COUNT(DISTINCT \"{column}\") FROM \"{table}\"")
            }
            Self::ListColumn { table, column } => {
                format!("SELECT DISTINCT \"{column}\" FROM \"{table}\" ORDER BY 1 LIMIT {LIST_LIMIT}")
            }
            Self::FilteredRows {
                table,
                column,
                operator,
                value,
            } => match operator.as_str() {
                "contains" => {
                    format!("SELECT * FROM \"{table}\" WHERE \"{column}\" LIKE '%{value}%'")
                }
                operator => {
                    let operator = if operator == "==" { "=" } else { operator };
                    let rendered = if value.parse::<f64>().is_ok() {
                        value.clone()
                    } else {
                        format!("'{value}'")
                    };
                    format!("SELECT * FROM \"{table}\" WHERE \"{column}\" {operator} {rendered}")
                }
            },
        }
    }
}

/// Detect a count/list question that resolves against a registered table or
/// column. Unresolvable subjects fall through to retrieval.
pub(crate) fn detect_direct_answer(query: &str, tables: &[TableInfo]) -> Option<DirectAnswer> {
    if tables.is_empty() {
        return None;
    }
    let lower = query.to_lowercase();

    // A resolvable condition wins over the plain count/list forms, so
    // "show invoices where amount > 100" filters instead of listing.
    let filtered = parse_filter_clause(&lower).and_then(|(column, operator, value)| {
        match_column(&column, tables).map(|(table, column)| DirectAnswer::FilteredRows {
            table,
            column,
            operator: operator.to_string(),
            value,
        })
    });

    if let Some(subject) = extract_subject(
        &lower,
        &["how many ", "count of ", "count the ", "count all ", "count ", "total number of "],
        &[
            " are there", " exist", " in total", " in ", " from ", " total", " records", " rows",
            " items", " entries", "?",
        ],
    ) {
        if filtered.is_some() {
            return filtered;
        }
        if subject.is_empty() || GENERIC_SUBJECTS.contains(&subject.as_str()) {
            let table = tables[0].name.clone();
            return Some(DirectAnswer::CountRows { table });
        }
        if let Some(table) = match_table(&subject, tables) {
            return Some(DirectAnswer::CountRows { table });
        }
        if let Some((table, column)) = match_column(&subject, tables) {
            return Some(DirectAnswer::CountDistinct { table, column });
        }
        return None;
    }

    if let Some(subject) = extract_subject(
        &lower,
        &[
            "list all ", "list the ", "list ", "show all ", "show the ", "show me ", "show ",
            "what are all ", "what are the ", "what are ", "what is the ", "give me all ",
            "give me the ", "give me ",
        ],
        &[" in ", " from ", "?"],
    ) {
        if filtered.is_some() {
            return filtered;
        }
        if let Some((table, column)) = match_column(&subject, tables) {
            return Some(DirectAnswer::ListColumn { table, column });
        }
    }

    None
}

/// Extract a `column operator value` condition following a filter keyword,
/// returning the canonical operator. The column is resolved by the caller.
fn parse_filter_clause(lower: &str) -> Option<(String, &'static str, String)> {
    for keyword in FILTER_KEYWORDS {
        let Some(start) = lower.find(keyword) else {
            continue;
        };
        let tail = lower[start + keyword.len()..].trim_start();
        let column: String = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if column.is_empty() {
            continue;
        }
        let rest = tail[column.len()..].trim_start();
        let Some((operator, consumed)) = match_operator(rest) else {
            continue;
        };
        let value = rest[consumed..]
            .trim()
            .trim_end_matches(['?', '.', '!'])
            .trim()
            .trim_matches(['\'', '"'])
            .to_string();
        if value.is_empty() {
            continue;
        }
        return Some((column, operator, value));
    }
    None
}

/// Match the leading comparison operator, mapping spoken forms onto the
/// canonical set. Longer patterns are tried first.
fn match_operator(rest: &str) -> Option<(&'static str, usize)> {
    const OPERATORS: [(&str, &str); 12] = [
        ("is not ", "!="),
        ("containing ", "contains"),
        ("contains ", "contains"),
        ("like ", "contains"),
        ("is ", "=="),
        (">=", ">="),
        ("<=", "<="),
        ("!=", "!="),
        ("==", "=="),
        ("=", "=="),
        (">", ">"),
        ("<", "<"),
    ];
    for (pattern, canonical) in OPERATORS {
        if rest.starts_with(pattern) {
            return Some((canonical, pattern.len()));
        }
    }
    None
}

/// Find the text between a recognized pattern prefix and the earliest
/// terminator. Prefixes must sit at a word boundary.
fn extract_subject(lower: &str, prefixes: &[&str], terminators: &[&str]) -> Option<String> {
    for prefix in prefixes {
        for (start, _) in lower.match_indices(prefix) {
            let boundary_ok = start == 0
                || lower[..start]
                    .chars()
                    .next_back()
                    .map(|c| c.is_whitespace())
                    .unwrap_or(true);
            if !boundary_ok {
                continue;
            }

            let tail = &lower[start + prefix.len()..];
            let end = terminators
                .iter()
                .filter_map(|terminator| tail.find(terminator))
                .min()
                .unwrap_or(tail.len());
            let subject = tail[..end]
                .trim()
                .trim_end_matches(['?', '.', '!'])
                .trim()
                .to_string();
            return Some(subject);
        }
    }
    None
}

fn singular(word: &str) -> &str {
    word.strip_suffix('s').unwrap_or(word)
}

fn names_match(subject: &str, candidate: &str) -> bool {
    let normalized = subject.replace(' ', "_");
    let candidate = candidate.to_lowercase();
    normalized == candidate || singular(&normalized) == singular(&candidate)
}

fn match_table(subject: &str, tables: &[TableInfo]) -> Option<String> {
    tables
        .iter()
        .find(|table| names_match(subject, &table.name))
        .map(|table| table.name.clone())
}

fn match_column(subject: &str, tables: &[TableInfo]) -> Option<(String, String)> {
    for table in tables {
        if let Some(column) = table
            .columns
            .iter()
            .find(|column| names_match(subject, &column.name))
        {
            return Some((table.name.clone(), column.name.clone()));
        }
    }
    None
}

/// One-line summary for a verbatim SQL result.
pub(crate) fn sql_summary(table: &TablePayload) -> String {
    format!(
        "Query executed successfully. {} rows returned.",
        table.rows.len()
    )
}

/// Natural-language summary for a direct count or list result.
pub(crate) fn direct_summary(direct: &DirectAnswer, result: &TablePayload) -> String {
    match direct {
        DirectAnswer::CountRows { table } => {
            format!("There are {} rows in table '{table}'.", leading_count(result))
        }
        DirectAnswer::CountDistinct { table, column } => format!(
            "There are {} distinct {column} values in table '{table}'.",
            leading_count(result)
        ),
        DirectAnswer::ListColumn { table, .. } => {
            if result.rows.is_empty() {
                return format!("No items found in table '{table}'.");
            }
            let mut summary = format!("Here are some results from table '{table}':");
            for row in &result.rows {
                summary.push_str("\n- ");
                summary.push_str(&display_cell(row.first()));
            }
            summary
        }
        DirectAnswer::FilteredRows {
            table,
            column,
            operator,
            value,
        } => {
            if result.rows.is_empty() {
                format!("No rows in table '{table}' match {column} {operator} {value}.")
            } else {
                format!(
                    "Found {} matching rows in table '{table}' ({column} {operator} {value}).",
                    result.rows.len()
                )
            }
        }
    }
}

fn leading_count(result: &TablePayload) -> i64 {
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn display_cell(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// One retrieved passage heading into context assembly.
#[derive(Debug, Clone)]
pub(crate) struct Passage {
    /// Source filename.
    pub source: String,
    /// Citation fragment such as `page=3`.
    pub locator: Option<String>,
    /// Registered table the passage describes, for tabular documents.
    pub table: Option<String>,
    /// Similarity score reported by the vector store.
    pub score: f32,
    /// Full passage text.
    pub text: String,
}

/// Render the citation tag for a passage: `[report.pdf#page=3]` or `[notes.txt]`.
pub(crate) fn citation_tag(source: &str, locator: Option<&str>) -> String {
    match locator {
        Some(locator) if !locator.is_empty() => format!("[{source}#{locator}]"),
        _ => format!("[{source}]"),
    }
}

/// Assemble the context block handed to the model.
pub(crate) fn build_context(passages: &[Passage], sql_leaning: bool) -> String {
    let mut table_names: Vec<&str> = Vec::new();
    for passage in passages {
        if let Some(table) = passage.table.as_deref() {
            if !table_names.contains(&table) {
                table_names.push(table);
            }
        }
    }

    let mut context = String::new();
    if sql_leaning && !table_names.is_empty() {
        context.push_str(
            "Your question appears to be about tabular data. I'll try to answer directly, but \
             for more detailed analysis, you could ask using SQL.\n\n",
        );
    }

    for passage in passages {
        let citation = citation_tag(&passage.source, passage.locator.as_deref());
        context.push_str(&format!("Content {citation}: {}\n\n", passage.text));
    }

    if !table_names.is_empty() {
        context.push_str(&format!(
            "\nNote: This data comes from tables: {}. You can query this data using SQL with \
             'SELECT * FROM {}'\n",
            table_names.join(", "),
            table_names[0]
        ));
    }

    context
}

/// Build the chat conversation: system prompt, prior turns, then the context
/// and question as the final user message.
pub(crate) fn build_messages(
    context: &str,
    query: &str,
    history: &[HistoryTurn],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

    for turn in history {
        match turn.role.as_str() {
            "user" => messages.push(ChatMessage::user(turn.content.clone())),
            "assistant" => messages.push(ChatMessage::assistant(turn.content.clone())),
            other => {
                tracing::debug!(role = other, "Skipping history turn with unknown role");
            }
        }
    }

    messages.push(ChatMessage::user(format!(
        "Context information is below.\n\n{context}\n\nQuestion: {query}"
    )));
    messages
}

/// Append a source line when the model cited nothing despite having context.
pub(crate) fn ensure_citation(answer: String, passages: &[Passage]) -> String {
    if answer.contains('[') || passages.is_empty() {
        return answer;
    }

    let mut sources: Vec<&str> = Vec::new();
    for passage in passages {
        if !sources.contains(&passage.source.as_str()) {
            sources.push(&passage.source);
        }
    }
    format!("{answer} (Source: {})", sources.join(", "))
}

/// Leading excerpt of a passage for the citation payload.
pub(crate) fn snippet_of(text: &str) -> String {
    const SNIPPET_CHARS: usize = 200;
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}
