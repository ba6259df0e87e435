//! Grammar-aware code chunking: splits a source file into bounded
//! chunks using a tree-sitter AST walk, falling back to byte/line ranges
//! when no grammar is available or a node won't fit.

use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use tree_sitter::{Node, Parser};

/// A bounded fragment of source code with a stable line range and digest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Chunk {
    pub workspace_rel_path: PathBuf,
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub digest: String,
    pub language_tag: Option<String>,
    /// Enclosing scope path (e.g. `["impl Foo", "fn bar"]`), innermost last.
    /// Not part of the chunk's identity; purely informational for retrieval.
    pub scope_path: Vec<String>,
    /// Set when this chunk was produced by splitting an oversized node.
    pub is_sub_split: bool,
}

/// Languages with a tree-sitter grammar wired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
}

impl Language {
    pub fn tag(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    fn is_collapsible(&self, kind: &str) -> bool {
        match self {
            Language::Rust => matches!(
                kind,
                "struct_item" | "enum_item" | "union_item" | "trait_item" | "impl_item" | "function_item" | "mod_item"
            ),
            Language::TypeScript | Language::Tsx | Language::JavaScript => matches!(
                kind,
                "class_declaration"
                    | "interface_declaration"
                    | "function_declaration"
                    | "method_definition"
                    | "enum_declaration"
                    | "module"
                    | "internal_module"
            ),
            Language::Python => matches!(kind, "class_definition" | "function_definition"),
            Language::Go => matches!(
                kind,
                "function_declaration" | "method_declaration" | "type_declaration"
            ),
        }
    }
}

/// Detect a language from a file extension. Returns `None` if no grammar
/// is wired in, in which case the caller should use the line-batch fallback.
pub fn detect_language(path: &Path) -> Option<Language> {
    match path.extension().and_then(|e| e.to_str())? {
        "rs" => Some(Language::Rust),
        "ts" => Some(Language::TypeScript),
        "tsx" => Some(Language::Tsx),
        "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
        "py" => Some(Language::Python),
        "go" => Some(Language::Go),
        _ => None,
    }
}

/// Cheap token-count surrogate used for all chunking decisions, per the
/// chunking contract: character count / 4.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn digest(content: &str) -> String {
    hex_encode(Sha256::digest(content.as_bytes()))
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.as_ref().len() * 2);
    for b in bytes.as_ref() {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

/// Precomputed line-start byte offsets, for mapping a byte offset to a
/// 1-based line number and for slicing exact line ranges.
struct LineIndex<'a> {
    content: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(content: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { content, line_starts }
    }

    fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 1-based line number containing `byte_offset`.
    fn line_at(&self, byte_offset: usize) -> usize {
        match self.line_starts.binary_search(&byte_offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Exact text of 1-based inclusive line range `[start, end]`.
    fn lines_text(&self, start: usize, end: usize) -> &'a str {
        let start_byte = self.line_starts[start - 1];
        let end_byte = if end < self.line_starts.len() {
            self.line_starts[end]
        } else {
            self.content.len()
        };
        self.content[start_byte..end_byte].trim_end_matches('\n')
    }
}

/// Split a file into a bounded sequence of chunks.
///
/// `max_chunk_tokens` bounds each chunk using [`estimate_tokens`]. When no
/// grammar matches the file's extension, falls back to
/// [`line_batch_fallback`].
pub fn chunk(workspace_rel_path: &Path, content: &str, max_chunk_tokens: usize) -> Vec<Chunk> {
    let Some(language) = detect_language(workspace_rel_path) else {
        return line_batch_fallback(workspace_rel_path, content, max_chunk_tokens, None);
    };

    let mut parser = Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        return line_batch_fallback(workspace_rel_path, content, max_chunk_tokens, Some(language));
    }
    let Some(tree) = parser.parse(content, None) else {
        return line_batch_fallback(workspace_rel_path, content, max_chunk_tokens, Some(language));
    };

    let lines = LineIndex::new(content);
    let mut chunks = Vec::new();
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        walk_node(
            child,
            content,
            &lines,
            language,
            max_chunk_tokens,
            workspace_rel_path,
            &[],
            &mut chunks,
        );
    }

    if chunks.is_empty() && lines.line_count() > 0 {
        return line_batch_fallback(workspace_rel_path, content, max_chunk_tokens, Some(language));
    }

    chunks
}

fn node_text<'a>(node: Node, content: &'a str) -> &'a str {
    &content[node.byte_range()]
}

fn node_signature_line(node: Node, content: &str) -> String {
    node_text(node, content)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// The node's body (the part recursion descends into / gets replaced by a
/// placeholder), found as the last named child whose kind looks like a body.
fn find_body_child(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| {
            let kind = c.kind();
            kind == "block" || kind.ends_with("_list") || kind.ends_with("_body") || kind.contains("body")
        })
        .last()
}

#[allow(clippy::too_many_arguments)]
fn walk_node(
    node: Node,
    content: &str,
    lines: &LineIndex,
    language: Language,
    max_chunk_tokens: usize,
    path: &Path,
    scope: &[String],
    out: &mut Vec<Chunk>,
) {
    let text = node_text(node, content);
    let est = estimate_tokens(text);
    let start_line = lines.line_at(node.start_byte());
    let end_line = lines.line_at(node.end_byte().saturating_sub(1).max(node.start_byte()));

    if est <= max_chunk_tokens {
        out.push(make_chunk(path, text.to_string(), start_line, end_line, Some(language), scope, false));
        return;
    }

    if language.is_collapsible(node.kind()) {
        let signature = node_signature_line(node, content);
        let overview_content = format!("{signature} {{ ... }}");
        out.push(make_chunk(
            path,
            overview_content,
            start_line,
            start_line,
            Some(language),
            scope,
            false,
        ));

        if est <= 2 * max_chunk_tokens {
            let full_content = match scope.last() {
                Some(enclosing) => format!("{enclosing}\n    ...\n{text}"),
                None => text.to_string(),
            };
            out.push(make_chunk(path, full_content, start_line, end_line, Some(language), scope, false));
            return;
        }

        let mut child_scope = scope.to_vec();
        child_scope.push(signature);
        let before_len = out.len();
        if let Some(body) = find_body_child(node) {
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                walk_node(child, content, lines, language, max_chunk_tokens, path, &child_scope, out);
            }
        }
        if out.len() == before_len {
            forced_line_split(path, content, lines, start_line, end_line, max_chunk_tokens, out);
        }
        return;
    }

    let mut cursor = node.walk();
    let before_len = out.len();
    for child in node.named_children(&mut cursor) {
        walk_node(child, content, lines, language, max_chunk_tokens, path, scope, out);
    }
    if out.len() == before_len {
        forced_line_split(path, content, lines, start_line, end_line, max_chunk_tokens, out);
    }
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    path: &Path,
    content: String,
    start_line: usize,
    end_line: usize,
    language: Option<Language>,
    scope: &[String],
    is_sub_split: bool,
) -> Chunk {
    Chunk {
        workspace_rel_path: path.to_path_buf(),
        digest: digest(&content),
        content,
        start_line,
        end_line,
        language_tag: language.map(|l| l.tag().to_string()),
        scope_path: scope.to_vec(),
        is_sub_split,
    }
}

/// Forced line splitting within a node's line range: accumulate lines
/// until the next line would push the estimate over budget.
fn forced_line_split(
    path: &Path,
    _content: &str,
    lines: &LineIndex,
    start_line: usize,
    end_line: usize,
    max_chunk_tokens: usize,
    out: &mut Vec<Chunk>,
) {
    let mut batch_start = start_line;
    let mut batch_lines: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for line_no in start_line..=end_line {
        let line_text = lines.lines_text(line_no, line_no);
        let line_tokens = estimate_tokens(line_text);
        if !batch_lines.is_empty() && current_tokens + line_tokens > max_chunk_tokens {
            let content = batch_lines.join("\n");
            out.push(make_chunk(path, content, batch_start, line_no - 1, None, &[], true));
            batch_lines.clear();
            current_tokens = 0;
            batch_start = line_no;
        }
        batch_lines.push(line_text);
        current_tokens += line_tokens;
    }

    if !batch_lines.is_empty() {
        let content = batch_lines.join("\n");
        out.push(make_chunk(path, content, batch_start, end_line, None, &[], true));
    }
}

/// Used for files with no available grammar: the same accumulate-until-
/// over-budget strategy as [`forced_line_split`], applied to the whole file.
pub fn line_batch_fallback(
    path: &Path,
    content: &str,
    max_chunk_tokens: usize,
    language: Option<Language>,
) -> Vec<Chunk> {
    let lines = LineIndex::new(content);
    if lines.line_count() == 0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut batch_start = 1usize;
    let mut batch_lines: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for line_no in 1..=lines.line_count() {
        let line_text = lines.lines_text(line_no, line_no);
        let line_tokens = estimate_tokens(line_text);
        if !batch_lines.is_empty() && current_tokens + line_tokens > max_chunk_tokens {
            let chunk_content = batch_lines.join("\n");
            out.push(make_chunk(path, chunk_content, batch_start, line_no - 1, language, &[], false));
            batch_lines.clear();
            current_tokens = 0;
            batch_start = line_no;
        }
        batch_lines.push(line_text);
        current_tokens += line_tokens;
    }

    if !batch_lines.is_empty() {
        let chunk_content = batch_lines.join("\n");
        out.push(make_chunk(path, chunk_content, batch_start, lines.line_count(), language, &[], false));
    }

    out
}

static TOKENIZER: std::sync::OnceLock<tiktoken_rs::CoreBPE> = std::sync::OnceLock::new();

fn get_tokenizer() -> &'static tiktoken_rs::CoreBPE {
    TOKENIZER.get_or_init(|| tiktoken_rs::cl100k_base().expect("failed to load cl100k_base tokenizer"))
}

/// Exact token count via the cl100k_base tokenizer. Not used for chunking
/// decisions (those use [`estimate_tokens`]); exposed as a diagnostic for
/// callers that want a precise count, e.g. for cost reporting.
pub fn count_tokens_exact(text: &str) -> usize {
    get_tokenizer().encode_ordinary(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_basic() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn count_tokens_exact_nonzero_for_text() {
        assert!(count_tokens_exact("hello world") > 0);
        assert_eq!(count_tokens_exact(""), 0);
    }

    #[test]
    fn detect_language_by_extension() {
        assert_eq!(detect_language(Path::new("a.rs")), Some(Language::Rust));
        assert_eq!(detect_language(Path::new("a.py")), Some(Language::Python));
        assert_eq!(detect_language(Path::new("a.go")), Some(Language::Go));
        assert_eq!(detect_language(Path::new("a.ts")), Some(Language::TypeScript));
        assert_eq!(detect_language(Path::new("a.tsx")), Some(Language::Tsx));
        assert_eq!(detect_language(Path::new("a.txt")), None);
    }

    #[test]
    fn line_batch_fallback_tracks_line_numbers() {
        let content = "line one\nline two\nline three\n";
        let chunks = line_batch_fallback(Path::new("a.txt"), content, 1000, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn line_batch_fallback_splits_on_budget() {
        let content = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\nbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n";
        let chunks = line_batch_fallback(Path::new("a.txt"), content, 5, None);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn unknown_extension_uses_line_batch_fallback() {
        let content = "some\nplain\ntext\n";
        let chunks = chunk(Path::new("notes.txt"), content, 1000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].language_tag.is_none());
    }

    #[test]
    fn rust_small_function_single_chunk() {
        let content = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = chunk(Path::new("lib.rs"), content, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].language_tag.as_deref(), Some("rust"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn rust_large_struct_emits_overview_and_full() {
        let mut body = String::new();
        for i in 0..200 {
            body.push_str(&format!("    pub field_{i}: u64,\n"));
        }
        let content = format!("pub struct Big {{\n{body}}}\n");
        let chunks = chunk(Path::new("lib.rs"), &content, 20);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.contains("{ ... }"));
    }

    #[test]
    fn python_function_chunk_has_language_tag() {
        let content = "def add(a, b):\n    return a + b\n";
        let chunks = chunk(Path::new("util.py"), content, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].language_tag.as_deref(), Some("python"));
    }

    #[test]
    fn digest_is_stable_for_identical_content() {
        let content = "fn x() {}\n";
        let a = chunk(Path::new("a.rs"), content, 1000);
        let b = chunk(Path::new("a.rs"), content, 1000);
        assert_eq!(a[0].digest, b[0].digest);
    }

    #[test]
    fn digest_differs_for_different_content() {
        let a = chunk(Path::new("a.rs"), "fn x() {}\n", 1000);
        let b = chunk(Path::new("a.rs"), "fn y() {}\n", 1000);
        assert_ne!(a[0].digest, b[0].digest);
    }

    #[test]
    fn line_range_soundness_for_fallback() {
        let content = "a\nb\nc\nd\ne\n";
        let chunks = line_batch_fallback(Path::new("f.txt"), content, 1, None);
        let mut prev_end = 0;
        for c in &chunks {
            assert!(c.start_line >= 1);
            assert!(c.start_line <= c.end_line);
            assert!(c.start_line > prev_end);
            prev_end = c.end_line;
        }
    }
}
