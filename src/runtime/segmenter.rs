//! Lexical segmentation of script source.
//!
//! The segmenter walks the source once, tracking string literals and an
//! explicit bracket stack, and groups physical lines into statements:
//! - A segment continues onto the next line while a string, `(`, `[`, `#{`
//!   or `switch` body is open, after a trailing binary operator, or when the
//!   line ends without `;`, `{` or `}` and the next code line does not close
//!   a block. Only a block tail may omit its `;`.
//! - Every segment is classified as blank, an instrumentable statement, a
//!   structural line (control flow, definitions, unbalanced braces) or a
//!   block terminator (`}`, `else`, `catch`).
//!
//! Comments are removed before segmentation without changing the number of
//! lines, so segment line numbers always refer to the original source.

use crate::{Result, RunnerError};

/// Keywords whose presence makes a segment structural.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "if", "else", "while", "loop", "for", "do", "until", "fn", "private", "switch", "try",
    "catch", "break", "continue", "return", "import", "export", "const",
];

/// Operators that, ending a line, join it with the next one.
const TRAILING_OPERATORS: &[&str] = &[
    "&&", "||", "??", "==", "!=", "=", "+", "-", "*", "/", "%", ",", ".", "?", "<", ">", "|",
    "&", "^",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Blank,
    Statement,
    Structural,
    Terminator,
}

/// A group of one or more physical lines forming one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Original text, lines joined by `\n`, comments removed.
    pub text: String,
    /// 1-based line of the first physical line.
    pub line: usize,
    pub kind: SegmentKind,
    /// The segment sits inside a user `try` block.
    pub inside_guard: bool,
}

impl Segment {
    pub fn instrumentable(&self) -> bool {
        matches!(self.kind, SegmentKind::Blank | SegmentKind::Statement)
    }

    pub fn line_count(&self) -> usize {
        self.text.matches('\n').count() + 1
    }
}

fn unterminated(line: usize, what: &str) -> anyhow::Error {
    RunnerError::Instrumentation {
        line,
        message: format!("unterminated {}", what),
    }
    .into()
}

// ── comments ─────────────────────────────────────────────────────────────────

/// Remove `//` and nested `/* */` comments, keeping every newline.
pub fn strip_comments(text: &str) -> Result<String> {
    #[derive(Clone, Copy)]
    enum Mode {
        Code,
        Line,
        Block { depth: usize, opened_at: usize },
        Str { escaped: bool },
        Backtick,
        Char { escaped: bool },
    }

    let mut out = String::with_capacity(text.len());
    let mut mode = Mode::Code;
    let mut line = 1;
    let mut str_start = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
        }
        mode = match mode {
            Mode::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    Mode::Line
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    Mode::Block {
                        depth: 1,
                        opened_at: line,
                    }
                }
                '"' | '`' | '\'' => {
                    out.push(c);
                    str_start = line;
                    match c {
                        '"' => Mode::Str { escaped: false },
                        '`' => Mode::Backtick,
                        _ => Mode::Char { escaped: false },
                    }
                }
                _ => {
                    out.push(c);
                    Mode::Code
                }
            },
            Mode::Line if c == '\n' => {
                out.push('\n');
                Mode::Code
            }
            Mode::Line => Mode::Line,
            Mode::Block { depth, opened_at } => {
                if c == '\n' {
                    out.push('\n');
                    mode
                } else if c == '/' && chars.peek() == Some(&'*') {
                    chars.next();
                    Mode::Block {
                        depth: depth + 1,
                        opened_at,
                    }
                } else if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    if depth == 1 {
                        Mode::Code
                    } else {
                        Mode::Block {
                            depth: depth - 1,
                            opened_at,
                        }
                    }
                } else {
                    mode
                }
            }
            Mode::Str { escaped } => {
                out.push(c);
                if escaped {
                    Mode::Str { escaped: false }
                } else if c == '\\' {
                    Mode::Str { escaped: true }
                } else if c == '"' {
                    Mode::Code
                } else if c == '\n' {
                    return Err(unterminated(str_start, "string literal"));
                } else {
                    mode
                }
            }
            Mode::Backtick => {
                out.push(c);
                if c == '`' {
                    Mode::Code
                } else {
                    mode
                }
            }
            Mode::Char { escaped } => {
                out.push(c);
                if escaped {
                    Mode::Char { escaped: false }
                } else if c == '\\' {
                    Mode::Char { escaped: true }
                } else if c == '\'' {
                    Mode::Code
                } else if c == '\n' {
                    return Err(unterminated(str_start, "character literal"));
                } else {
                    mode
                }
            }
        };
    }

    match mode {
        Mode::Code | Mode::Line => Ok(out),
        Mode::Block { opened_at, .. } => Err(unterminated(opened_at, "block comment")),
        Mode::Str { .. } => Err(unterminated(str_start, "string literal")),
        Mode::Backtick => Err(unterminated(str_start, "multi-line string")),
        Mode::Char { .. } => Err(unterminated(str_start, "character literal")),
    }
}

// ── scanning ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Plain,
    Try,
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Paren(usize),
    Bracket(usize),
    Map(usize),
    Block(BlockKind, usize),
}

impl Open {
    fn line(self) -> usize {
        match self {
            Open::Paren(line) | Open::Bracket(line) | Open::Map(line) | Open::Block(_, line) => {
                line
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrMode {
    Double,
    Backtick,
}

#[derive(Debug, Default)]
struct Scanner {
    stack: Vec<Open>,
    string: Option<(StrMode, usize)>,
    escaped: bool,
    pending_try: bool,
    pending_switch: bool,
}

impl Scanner {
    fn inside_try(&self) -> bool {
        self.stack
            .iter()
            .any(|open| matches!(open, Open::Block(BlockKind::Try, _)))
    }

    /// An open construct forces the segment onto the next line.
    fn needs_more(&self) -> bool {
        self.string.is_some()
            || self
                .stack
                .iter()
                .any(|open| !matches!(open, Open::Block(BlockKind::Plain | BlockKind::Try, _)))
    }

    fn end_token(&mut self, token: &mut String) {
        match token.as_str() {
            "try" => self.pending_try = true,
            "switch" => self.pending_switch = true,
            _ => {}
        }
        token.clear();
    }

    /// Scan one physical line, returning its mask: the line with string
    /// contents blanked out.
    fn scan_line(&mut self, line: &str, line_no: usize) -> Result<String> {
        let mut mask = String::with_capacity(line.len());
        let mut token = String::new();
        let mut prev_code: Option<char> = None;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if let Some((mode, _)) = self.string {
                if self.escaped {
                    self.escaped = false;
                    mask.push(' ');
                    continue;
                }
                match (mode, c) {
                    (StrMode::Double, '\\') => {
                        self.escaped = true;
                        mask.push(' ');
                    }
                    (StrMode::Double, '"') | (StrMode::Backtick, '`') => {
                        self.string = None;
                        mask.push(c);
                        prev_code = Some(c);
                    }
                    _ => mask.push(' '),
                }
                continue;
            }

            if c.is_alphanumeric() || c == '_' {
                token.push(c);
                mask.push(c);
                prev_code = Some(c);
                continue;
            }
            self.end_token(&mut token);

            match c {
                '"' => {
                    self.string = Some((StrMode::Double, line_no));
                    mask.push(c);
                }
                '`' => {
                    self.string = Some((StrMode::Backtick, line_no));
                    mask.push(c);
                }
                '\'' => {
                    mask.push(c);
                    let mut escaped = false;
                    loop {
                        match chars.next() {
                            Some('\\') if !escaped => {
                                escaped = true;
                                mask.push(' ');
                            }
                            Some('\'') if !escaped => {
                                mask.push('\'');
                                break;
                            }
                            Some(_) => {
                                escaped = false;
                                mask.push(' ');
                            }
                            None => return Err(unterminated(line_no, "character literal")),
                        }
                    }
                }
                '(' => {
                    self.stack.push(Open::Paren(line_no));
                    mask.push(c);
                }
                '[' => {
                    self.stack.push(Open::Bracket(line_no));
                    mask.push(c);
                }
                '{' => {
                    let open = if prev_code == Some('#') {
                        Open::Map(line_no)
                    } else if self.pending_try {
                        Open::Block(BlockKind::Try, line_no)
                    } else if self.pending_switch {
                        Open::Block(BlockKind::Switch, line_no)
                    } else {
                        Open::Block(BlockKind::Plain, line_no)
                    };
                    self.pending_try = false;
                    self.pending_switch = false;
                    self.stack.push(open);
                    mask.push(c);
                }
                ')' | ']' | '}' => {
                    self.stack.pop();
                    mask.push(c);
                }
                ';' => {
                    self.pending_try = false;
                    self.pending_switch = false;
                    mask.push(c);
                }
                '\r' => mask.push(' '),
                _ => mask.push(c),
            }
            if !c.is_whitespace() {
                prev_code = Some(c);
            }
        }
        self.end_token(&mut token);

        if let Some((StrMode::Double, opened)) = self.string {
            // A double-quoted string only continues across a trailing `\`.
            if self.escaped {
                self.escaped = false;
            } else {
                return Err(unterminated(opened, "string literal"));
            }
        }
        Ok(mask)
    }

    fn check_closed(&self) -> Result<()> {
        if let Some((mode, line)) = self.string {
            let what = match mode {
                StrMode::Double => "string literal",
                StrMode::Backtick => "multi-line string",
            };
            return Err(unterminated(line, what));
        }
        if let Some(open) = self.stack.first() {
            let what = match open {
                Open::Paren(_) => "parenthesis",
                Open::Bracket(_) => "bracket",
                Open::Map(_) => "object map",
                Open::Block(..) => "block",
            };
            return Err(unterminated(open.line(), what));
        }
        Ok(())
    }
}

fn ends_with_operator(mask: &str) -> bool {
    let trimmed = mask.trim_end();
    if trimmed.ends_with("=>") {
        return false;
    }
    TRAILING_OPERATORS.iter().any(|op| trimmed.ends_with(op))
}

/// Whether code follows line `index` before the enclosing block closes.
fn next_code_line_continues(lines: &[&str], index: usize) -> bool {
    lines[index + 1..]
        .iter()
        .map(|line| line.trim_start())
        .find(|line| !line.is_empty())
        .is_some_and(|line| !line.starts_with('}'))
}

/// Split comment-free source into segments.
pub fn segments(text: &str) -> Result<Vec<Segment>> {
    let stripped = strip_comments(text)?;
    let lines: Vec<&str> = stripped.split('\n').collect();

    let mut scanner = Scanner::default();
    let mut segments = Vec::new();
    let mut raw: Vec<&str> = Vec::new();
    let mut mask: Vec<String> = Vec::new();
    let mut start = 0;
    let mut inside_guard = false;

    for (index, line) in lines.iter().enumerate() {
        if raw.is_empty() {
            start = index;
            inside_guard = scanner.inside_try();
        }
        let line_mask = scanner.scan_line(line, index + 1)?;
        let blank = line_mask.trim().is_empty();
        raw.push(line);
        mask.push(line_mask);

        let last = index + 1 == lines.len();
        let joined_mask = mask.join("\n");
        let tail = joined_mask.trim_end().chars().last();
        let open_tail = tail.is_some_and(|c| !matches!(c, ';' | '{' | '}'));
        let continues = !last
            && (scanner.needs_more()
                || (!blank && ends_with_operator(&mask[mask.len() - 1]))
                || (open_tail && next_code_line_continues(&lines, index)));
        if continues {
            continue;
        }

        segments.push(Segment {
            text: raw.join("\n"),
            line: start + 1,
            kind: classify(&joined_mask),
            inside_guard,
        });
        raw.clear();
        mask.clear();
    }

    scanner.check_closed()?;
    Ok(segments)
}

// ── classification ───────────────────────────────────────────────────────────

fn tokens(mask: &str) -> impl Iterator<Item = &str> {
    mask.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
}

/// Count of `;` outside any bracket of the segment.
fn top_level_semicolons(mask: &str) -> usize {
    let mut depth = 0i32;
    let mut count = 0;
    for c in mask.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ';' if depth <= 0 => count += 1,
            _ => {}
        }
    }
    count
}

/// `let NAME = EXPR;` with a single statement and nothing after it.
pub(crate) fn is_simple_let(mask: &str) -> bool {
    let trimmed = mask.trim();
    let Some(rest) = trimmed.strip_prefix("let") else {
        return false;
    };
    if !rest.starts_with(char::is_whitespace) {
        return false;
    }
    let rest = rest.trim_start();
    let name_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if name_len == 0 {
        return false;
    }
    let after = rest[name_len..].trim_start();
    after.starts_with('=')
        && !after.starts_with("==")
        && trimmed.ends_with(';')
        && top_level_semicolons(trimmed) == 1
        && tokens(trimmed).filter(|token| *token == "let").count() == 1
}

fn classify(mask: &str) -> SegmentKind {
    let trimmed = mask.trim();
    if trimmed.is_empty() {
        return SegmentKind::Blank;
    }
    if trimmed.starts_with(['}', ')', ']']) {
        return SegmentKind::Terminator;
    }
    if let Some(first) = tokens(trimmed).next() {
        if (first == "else" || first == "catch") && trimmed.starts_with(first) {
            return SegmentKind::Terminator;
        }
    }
    if tokens(trimmed).any(|token| STRUCTURAL_KEYWORDS.contains(&token)) {
        return SegmentKind::Structural;
    }
    if tokens(trimmed).any(|token| token == "let") && !is_simple_let(trimmed) {
        return SegmentKind::Structural;
    }
    let opens = trimmed.matches('{').count();
    let closes = trimmed.matches('}').count();
    if opens != closes {
        return SegmentKind::Structural;
    }
    SegmentKind::Statement
}
