use crate::error::ScanError;
use crate::utils::{
    find_matching, find_matching_backwards, identifiers, is_ident_char, is_identifier,
    normalize_whitespace, split_top_level, strip_comments_and_literals,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};

/// Index of a statement inside its function's statement list.
pub type StmtId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Contract,
    AbstractContract,
    Library,
    Interface,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Contract => "contract",
            ContractKind::AbstractContract => "abstract contract",
            ContractKind::Library => "library",
            ContractKind::Interface => "interface",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub name: String,
    pub kind: ContractKind,
    pub line: usize,
    pub end_line: usize,
    pub inherits: Vec<String>,
    /// Own declarations first, then those inherited from bases in the same file.
    pub state_variables: Vec<StateVariable>,
    pub modifiers: Vec<Modifier>,
    pub functions: Vec<Function>,
}

impl Contract {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn modifier(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.name == name)
    }

    pub fn has_state_variable(&self, name: &str) -> bool {
        self.state_variables.iter().any(|v| v.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Scalar,
    Mapping,
    Array,
}

#[derive(Debug, Clone)]
pub struct StateVariable {
    pub name: String,
    pub type_name: String,
    pub kind: VariableKind,
    pub line: usize,
    pub inherited_from: Option<String>,
}

/// Whether a modifier behaves like a mutual-exclusion guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    Mutex,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Modifier {
    pub name: String,
    pub line: usize,
    pub guard: GuardKind,
}

#[derive(Debug, Clone)]
pub struct AppliedModifier {
    pub name: String,
    /// False when no declaration was found in the contract or its same-file bases.
    pub resolved: bool,
    pub guard: GuardKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Regular,
    Constructor,
    Fallback,
    Receive,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub payable: bool,
    pub read_only: bool,
    pub modifiers: Vec<AppliedModifier>,
    pub parameters: Vec<Parameter>,
    pub statements: Vec<Statement>,
    pub calls: Vec<CallSite>,
    pub state_accesses: Vec<StateAccess>,
    pub loops: Vec<LoopRange>,
    pub start_line: usize,
    pub end_line: usize,
}

impl Function {
    pub fn is_externally_invocable(&self) -> bool {
        matches!(self.visibility, Visibility::Public | Visibility::External)
    }

    pub fn has_mutex_guard(&self) -> bool {
        self.modifiers.iter().any(|m| m.guard == GuardKind::Mutex)
    }

    pub fn has_unresolved_modifiers(&self) -> bool {
        self.modifiers
            .iter()
            .any(|m| !m.resolved && m.guard == GuardKind::Unknown)
    }

    pub fn has_external_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// The earliest call site by source line.
    pub fn first_call(&self) -> Option<&CallSite> {
        self.calls.iter().min_by_key(|c| (c.line, c.stmt))
    }

    pub fn statement(&self, id: StmtId) -> Option<&Statement> {
        self.statements.get(id)
    }

    pub fn accesses<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a StateAccess> + 'a {
        self.state_accesses
            .iter()
            .filter(move |a| a.variable == variable)
    }

    pub fn first_access_line(&self, variable: &str) -> Option<usize> {
        self.accesses(variable).map(|a| a.line).min()
    }

    pub fn writes(&self, variable: &str) -> bool {
        self.accesses(variable).any(|a| a.kind == AccessKind::Write)
    }

    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    pub fn loop_range(&self, header: StmtId) -> Option<&LoopRange> {
        self.loops.iter().find(|l| l.header == header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    StateWrite,
    StateRead,
    ExternalCall,
    DelegateCall,
    LoopHeader,
    /// Marks the closing brace of a loop body.
    LoopEnd,
    Other,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub id: StmtId,
    pub line: usize,
    pub kind: StatementKind,
    /// Comment- and literal-stripped text with whitespace collapsed.
    pub text: String,
    pub enclosing_loop: Option<StmtId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    LowLevel,
    Send,
    Transfer,
    Interface,
    Delegate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    MsgSender,
    Named(String),
    Unknown,
}

impl std::fmt::Display for CallTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallTarget::MsgSender => write!(f, "msg.sender"),
            CallTarget::Named(name) => write!(f, "{}", name),
            CallTarget::Unknown => write!(f, "unknown target"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallSite {
    pub stmt: StmtId,
    pub line: usize,
    pub kind: CallKind,
    pub target: CallTarget,
    pub forwards_value: bool,
    pub enclosing_loop: Option<StmtId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct StateAccess {
    pub stmt: StmtId,
    pub line: usize,
    pub variable: String,
    pub kind: AccessKind,
}

#[derive(Debug, Clone)]
pub struct LoopRange {
    pub header: StmtId,
    pub start_line: usize,
    pub end_line: usize,
}

static CONTRACT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(abstract\s+)?(contract|library|interface)\s+([A-Za-z_$][\w$]*)(?:\s+is\s+(.+))?$")
        .unwrap()
});
static FUNCTION_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^function\s+([A-Za-z_$][\w$]*)\s*\(").unwrap());
static SPECIAL_FUNCTION_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(constructor|fallback|receive)\s*\(").unwrap());
static UNNAMED_FALLBACK_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^function\s*\(").unwrap());
static MODIFIER_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^modifier\s+([A-Za-z_$][\w$]*)").unwrap());
static TYPE_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(struct|enum)\s+([A-Za-z_$][\w$]*)").unwrap());
static LOOP_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(for|while)\s*\(").unwrap());
static EXPRESSION_BRACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\.\s*[A-Za-z_$][\w$]*|\bnew\s+[A-Za-z_$][\w$.]*)\s*$").unwrap()
});

static DELEGATE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\s*(delegatecall|callcode)\s*\(").unwrap());
static LOW_LEVEL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\s*call\s*(?:\{|\(|\.\s*value\s*\()").unwrap());
static SEND_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s*send\s*\(").unwrap());
static TRANSFER_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s*transfer\s*\(").unwrap());
static INTERFACE_CAST_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][\w$]*)\s*\(\s*([^()]*?)\s*\)\s*\.\s*([A-Za-z_$][\w$]*)\s*\(").unwrap()
});
static MEMBER_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_$][\w$]*)\s*(?:\[[^\]]*\]\s*)*\.\s*([A-Za-z_$][\w$]*)\s*[({]").unwrap()
});
static VALUE_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^}]*\bvalue\s*:|\.\s*value\s*\(").unwrap());
static CAST_WRAPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:payable|address)\s*\((.*)\)$").unwrap());
static GUARD_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_$][\w$]*)\s*=\s*(?:true|false|\d+|[A-Z_][A-Z0-9_]*)$").unwrap()
});

const LOW_LEVEL_MEMBERS: &[&str] = &[
    "call", "send", "transfer", "delegatecall", "callcode", "staticcall", "value",
];
const ARRAY_MEMBERS: &[&str] = &["push", "pop", "length"];
const DECLARATION_WORDS: &[&str] = &["memory", "storage", "calldata"];
const NON_STATE_PREFIXES: &[&str] = &[
    "using", "event", "error", "function", "modifier", "constructor", "fallback", "receive",
    "pragma", "import", "type", "struct", "enum",
];

/// True for modifier names that conventionally denote a re-entrancy mutex.
pub fn is_well_known_guard(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered.contains("reentran")
        || matches!(
            lowered.as_str(),
            "lock" | "locked" | "mutex" | "noreentry" | "guarded"
        )
}

pub struct SolidityParser;

impl SolidityParser {
    /// Builds one model per top-level contract, library or interface in `source`.
    pub fn parse(source: &str) -> Result<Vec<Contract>, ScanError> {
        let sanitized = strip_comments_and_literals(source);
        let mut builder = ModelBuilder::default();
        for chunk in chunk_source(&sanitized)? {
            builder.consume(chunk)?;
        }
        let drafts = builder.finish()?;
        Ok(resolve_contracts(&drafts))
    }
}

#[derive(Debug)]
enum Chunk {
    Open { header: String, line: usize },
    Statement { text: String, line: usize },
    Close { line: usize },
}

/// Splits sanitized source into block headers, statements and block ends.
///
/// Braces inside parentheses, call options (`x.call{value: v}`) and `new C{salt: s}`
/// belong to the surrounding expression and never open a block.
fn chunk_source(sanitized: &str) -> Result<Vec<Chunk>, ScanError> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_line = 1usize;
    let mut line = 1usize;
    let mut paren_depth = 0usize;
    let mut paren_line = 0usize;
    let mut inline_braces = 0usize;
    let mut inline_line = 0usize;

    for ch in sanitized.chars() {
        match ch {
            '\n' => {
                line += 1;
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                continue;
            }
            '(' | '[' => {
                if paren_depth == 0 {
                    paren_line = line;
                }
                paren_depth += 1;
            }
            ')' | ']' => paren_depth = paren_depth.saturating_sub(1),
            '{' if paren_depth == 0 && inline_braces == 0 && !EXPRESSION_BRACE.is_match(&buffer) => {
                let header_line = if buffer.is_empty() { line } else { buffer_line };
                chunks.push(Chunk::Open {
                    header: normalize_whitespace(&buffer),
                    line: header_line,
                });
                buffer.clear();
                continue;
            }
            '{' => {
                if inline_braces == 0 {
                    inline_line = line;
                }
                inline_braces += 1;
            }
            '}' if inline_braces > 0 => inline_braces -= 1,
            '}' => {
                flush_statement(&mut chunks, &mut buffer, buffer_line);
                chunks.push(Chunk::Close { line });
                continue;
            }
            ';' if paren_depth == 0 && inline_braces == 0 => {
                flush_statement(&mut chunks, &mut buffer, buffer_line);
                continue;
            }
            _ => {}
        }

        if buffer.is_empty() {
            if ch.is_whitespace() {
                continue;
            }
            buffer_line = line;
        }
        buffer.push(ch);
    }

    if paren_depth > 0 {
        return Err(ScanError::parse(paren_line, "unbalanced parentheses: opened here and never closed"));
    }
    if inline_braces > 0 {
        return Err(ScanError::parse(inline_line, "unbalanced braces inside expression"));
    }
    flush_statement(&mut chunks, &mut buffer, buffer_line);
    Ok(chunks)
}

/// Statement text keeps its line breaks so a split-off loop body can recover its own line.
fn flush_statement(chunks: &mut Vec<Chunk>, buffer: &mut String, line: usize) {
    let text = buffer.trim();
    if !text.is_empty() {
        chunks.push(Chunk::Statement {
            text: text.to_string(),
            line,
        });
    }
    buffer.clear();
}

#[derive(Debug)]
enum Frame {
    Contract { line: usize },
    Function { line: usize },
    Modifier { line: usize },
    Loop { header: StmtId, line: usize },
    Block { line: usize },
    Opaque { line: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RawRole {
    Plain,
    LoopHeader,
    LoopEnd,
}

#[derive(Debug)]
struct RawStatement {
    line: usize,
    text: String,
    role: RawRole,
    enclosing_loop: Option<StmtId>,
}

#[derive(Debug, Default)]
struct BodyDraft {
    statements: Vec<RawStatement>,
    loops: Vec<LoopRange>,
}

impl BodyDraft {
    fn push(&mut self, line: usize, text: &str, role: RawRole, enclosing_loop: Option<StmtId>) -> StmtId {
        self.statements.push(RawStatement {
            line,
            text: text.to_string(),
            role,
            enclosing_loop,
        });
        self.statements.len() - 1
    }
}

#[derive(Debug)]
struct FunctionHeader {
    name: String,
    kind: FunctionKind,
    visibility: Visibility,
    payable: bool,
    read_only: bool,
    modifiers: Vec<String>,
    parameters: Vec<Parameter>,
}

#[derive(Debug)]
struct FunctionDraft {
    header: FunctionHeader,
    start_line: usize,
    end_line: usize,
    body: BodyDraft,
}

#[derive(Debug)]
struct ModifierDraft {
    name: String,
    line: usize,
    body: BodyDraft,
}

#[derive(Debug)]
enum OpenBody {
    Function(FunctionDraft),
    Modifier(ModifierDraft),
}

impl OpenBody {
    fn body_mut(&mut self) -> &mut BodyDraft {
        match self {
            OpenBody::Function(f) => &mut f.body,
            OpenBody::Modifier(m) => &mut m.body,
        }
    }

    fn describe(&self) -> String {
        match self {
            OpenBody::Function(f) => format!("function `{}`", f.header.name),
            OpenBody::Modifier(m) => format!("modifier `{}`", m.name),
        }
    }
}

#[derive(Debug)]
struct ContractDraft {
    name: String,
    kind: ContractKind,
    line: usize,
    end_line: usize,
    inherits: Vec<String>,
    state_variables: Vec<StateVariable>,
    type_names: HashSet<String>,
    modifiers: Vec<ModifierDraft>,
    functions: Vec<FunctionDraft>,
}

#[derive(Default)]
struct ModelBuilder {
    frames: Vec<Frame>,
    contract: Option<ContractDraft>,
    body: Option<OpenBody>,
    finished: Vec<ContractDraft>,
}

impl ModelBuilder {
    fn consume(&mut self, chunk: Chunk) -> Result<(), ScanError> {
        match chunk {
            Chunk::Open { header, line } => {
                self.open(&header, line);
                Ok(())
            }
            Chunk::Statement { text, line } => {
                self.statement(&text, line);
                Ok(())
            }
            Chunk::Close { line } => self.close(line),
        }
    }

    fn in_opaque(&self) -> bool {
        self.frames.iter().any(|f| matches!(f, Frame::Opaque { .. }))
    }

    fn enclosing_loop(&self) -> Option<StmtId> {
        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Loop { header, .. } => return Some(*header),
                Frame::Function { .. } | Frame::Modifier { .. } => return None,
                _ => {}
            }
        }
        None
    }

    fn open(&mut self, header: &str, line: usize) {
        if self.in_opaque() {
            self.frames.push(Frame::Opaque { line });
            return;
        }

        match self.frames.last() {
            None => {
                if let Some(draft) = parse_contract_header(header, line) {
                    self.contract = Some(draft);
                    self.frames.push(Frame::Contract { line });
                } else {
                    self.frames.push(Frame::Opaque { line });
                }
            }
            Some(Frame::Contract { .. }) => self.open_member(header, line),
            Some(_) => self.open_nested_block(header, line),
        }
    }

    fn open_member(&mut self, header: &str, line: usize) {
        if let Some(parsed) = parse_function_header(header) {
            self.body = Some(OpenBody::Function(FunctionDraft {
                header: parsed,
                start_line: line,
                end_line: line,
                body: BodyDraft::default(),
            }));
            self.frames.push(Frame::Function { line });
        } else if let Some(caps) = MODIFIER_DECL.captures(header) {
            self.body = Some(OpenBody::Modifier(ModifierDraft {
                name: caps[1].to_string(),
                line,
                body: BodyDraft::default(),
            }));
            self.frames.push(Frame::Modifier { line });
        } else {
            if let (Some(caps), Some(contract)) = (TYPE_DECL.captures(header), self.contract.as_mut()) {
                contract.type_names.insert(caps[2].to_string());
            }
            self.frames.push(Frame::Opaque { line });
        }
    }

    fn open_nested_block(&mut self, header: &str, line: usize) {
        if header.starts_with("assembly") {
            self.frames.push(Frame::Opaque { line });
            return;
        }
        let enclosing = self.enclosing_loop();
        let Some(body) = self.body.as_mut().map(OpenBody::body_mut) else {
            self.frames.push(Frame::Opaque { line });
            return;
        };

        if LOOP_HEADER.is_match(header) || header == "do" {
            let id = body.push(line, header, RawRole::LoopHeader, enclosing);
            self.frames.push(Frame::Loop { header: id, line });
        } else {
            if !matches!(header, "" | "else" | "unchecked") {
                body.push(line, header, RawRole::Plain, enclosing);
            }
            self.frames.push(Frame::Block { line });
        }
    }

    fn statement(&mut self, text: &str, line: usize) {
        if self.in_opaque() {
            return;
        }
        match self.frames.last() {
            None => {}
            Some(Frame::Contract { .. }) => {
                let text = normalize_whitespace(text);
                if let (Some(var), Some(contract)) = (parse_state_variable(&text, line), self.contract.as_mut()) {
                    if !contract.state_variables.iter().any(|v| v.name == var.name) {
                        contract.state_variables.push(var);
                    }
                }
            }
            Some(_) => self.body_statement(text, line),
        }
    }

    fn body_statement(&mut self, text: &str, line: usize) {
        let mut enclosing = self.enclosing_loop();
        let Some(body) = self.body.as_mut().map(OpenBody::body_mut) else {
            return;
        };

        // Brace-less loops: `for (...) target.call("");`
        let mut line = line;
        let mut rest = text.trim();
        let first_loop = body.loops.len();
        while let Some(close) = split_loop_header(rest) {
            let after = &rest[close + 1..];
            let remainder = after.trim_start();
            if remainder.is_empty() {
                break;
            }
            let body_start = close + 1 + (after.len() - remainder.len());
            let body_line = line + rest[..body_start].matches('\n').count();
            let id = body.push(line, &normalize_whitespace(&rest[..=close]), RawRole::LoopHeader, enclosing);
            body.loops.push(LoopRange {
                header: id,
                start_line: line,
                end_line: body_line,
            });
            enclosing = Some(id);
            line = body_line;
            rest = remainder;
        }
        let last_line = line + rest.matches('\n').count();
        for range in &mut body.loops[first_loop..] {
            range.end_line = last_line;
        }
        body.push(line, &normalize_whitespace(rest), RawRole::Plain, enclosing);
    }

    fn close(&mut self, line: usize) -> Result<(), ScanError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| ScanError::parse(line, "unexpected closing brace with no open block"))?;

        match frame {
            Frame::Loop { header, .. } => {
                if let Some(body) = self.body.as_mut().map(OpenBody::body_mut) {
                    body.push(line, "}", RawRole::LoopEnd, Some(header));
                    if let Some(start_line) = body.statements.get(header).map(|s| s.line) {
                        body.loops.push(LoopRange {
                            header,
                            start_line,
                            end_line: line,
                        });
                    }
                }
            }
            Frame::Function { .. } | Frame::Modifier { .. } => {
                if let (Some(open), Some(contract)) = (self.body.take(), self.contract.as_mut()) {
                    match open {
                        OpenBody::Function(mut function) => {
                            function.end_line = line;
                            function.body.loops.sort_by_key(|l| l.header);
                            contract.functions.push(function);
                        }
                        OpenBody::Modifier(modifier) => contract.modifiers.push(modifier),
                    }
                }
            }
            Frame::Contract { .. } => {
                if let Some(mut contract) = self.contract.take() {
                    contract.end_line = line;
                    self.finished.push(contract);
                }
            }
            Frame::Block { .. } | Frame::Opaque { .. } => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<ContractDraft>, ScanError> {
        if let Some(innermost) = self.frames.last() {
            let error = match (&self.body, &self.contract) {
                (Some(open), _) => {
                    let line = self
                        .frames
                        .iter()
                        .rev()
                        .find_map(|f| match f {
                            Frame::Function { line } | Frame::Modifier { line } => Some(*line),
                            _ => None,
                        })
                        .unwrap_or(0);
                    ScanError::parse(line, format!("{} body is not closed", open.describe()))
                }
                (None, Some(contract)) if matches!(innermost, Frame::Contract { .. }) => ScanError::parse(
                    contract.line,
                    format!("{} `{}` is not closed", contract.kind.as_str(), contract.name),
                ),
                _ => {
                    let line = match innermost {
                        Frame::Contract { line }
                        | Frame::Function { line }
                        | Frame::Modifier { line }
                        | Frame::Loop { line, .. }
                        | Frame::Block { line }
                        | Frame::Opaque { line } => *line,
                    };
                    ScanError::parse(line, "unbalanced braces: block is not closed")
                }
            };
            return Err(error);
        }
        Ok(self.finished)
    }
}

fn parse_contract_header(header: &str, line: usize) -> Option<ContractDraft> {
    let caps = CONTRACT_DECL.captures(header)?;
    let kind = match (&caps.get(1), &caps[2]) {
        (Some(_), _) => ContractKind::AbstractContract,
        (None, "library") => ContractKind::Library,
        (None, "interface") => ContractKind::Interface,
        _ => ContractKind::Contract,
    };
    let inherits = caps
        .get(4)
        .map(|bases| {
            split_top_level(bases.as_str(), ',')
                .into_iter()
                .filter_map(|base| {
                    let base = base.trim();
                    let end = base.find(|c: char| !is_ident_char(c)).unwrap_or(base.len());
                    let name = &base[..end];
                    is_identifier(name).then(|| name.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ContractDraft {
        name: caps[3].to_string(),
        kind,
        line,
        end_line: line,
        inherits,
        state_variables: Vec::new(),
        type_names: HashSet::new(),
        modifiers: Vec::new(),
        functions: Vec::new(),
    })
}

fn parse_function_header(header: &str) -> Option<FunctionHeader> {
    let (name, kind) = if let Some(caps) = FUNCTION_DECL.captures(header) {
        (caps[1].to_string(), FunctionKind::Regular)
    } else if let Some(caps) = SPECIAL_FUNCTION_DECL.captures(header) {
        let kind = match &caps[1] {
            "constructor" => FunctionKind::Constructor,
            "fallback" => FunctionKind::Fallback,
            _ => FunctionKind::Receive,
        };
        (caps[1].to_string(), kind)
    } else if UNNAMED_FALLBACK_DECL.is_match(header) {
        ("fallback".to_string(), FunctionKind::Fallback)
    } else {
        return None;
    };

    let open = header.find('(')?;
    let close = find_matching(header, open, b'(', b')').unwrap_or(header.len() - 1);
    let parameters = parse_parameters(header.get(open + 1..close).unwrap_or(""));

    let mut visibility = None;
    let mut payable = false;
    let mut read_only = false;
    let mut modifiers = Vec::new();

    let mut rest = header.get(close + 1..).unwrap_or("").trim_start();
    while !rest.is_empty() {
        let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        if end == 0 {
            let skip = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            rest = rest[skip..].trim_start();
            continue;
        }
        let word = &rest[..end];
        let mut after = rest[end..].trim_start();
        if after.starts_with('(') {
            let args_end = find_matching(after, 0, b'(', b')').unwrap_or(after.len() - 1);
            after = after[args_end + 1..].trim_start();
        }
        match word {
            "public" => visibility = Some(Visibility::Public),
            "external" => visibility = Some(Visibility::External),
            "internal" => visibility = Some(Visibility::Internal),
            "private" => visibility = Some(Visibility::Private),
            "payable" => payable = true,
            "view" | "pure" | "constant" => read_only = true,
            "virtual" | "override" | "returns" => {}
            // Base constructor arguments, not modifiers.
            _ if kind == FunctionKind::Constructor && word.starts_with(|c: char| c.is_ascii_uppercase()) => {}
            _ => modifiers.push(word.to_string()),
        }
        rest = after;
    }

    let visibility = visibility.unwrap_or(match kind {
        FunctionKind::Fallback | FunctionKind::Receive => Visibility::External,
        _ => Visibility::Public,
    });

    Some(FunctionHeader {
        name,
        kind,
        visibility,
        payable,
        read_only,
        modifiers,
        parameters,
    })
}

fn parse_parameters(text: &str) -> Vec<Parameter> {
    split_top_level(text, ',')
        .into_iter()
        .filter_map(|param| {
            let tokens: Vec<&str> = param
                .split_whitespace()
                .filter(|t| !DECLARATION_WORDS.contains(t) && *t != "indexed")
                .collect();
            if tokens.len() < 2 {
                return None;
            }
            let name = tokens[tokens.len() - 1];
            is_identifier(name).then(|| Parameter {
                name: name.to_string(),
                type_name: tokens[..tokens.len() - 1].join(" "),
            })
        })
        .collect()
}

/// Byte index of the first `=` that assigns (not `==`, `=>`, `<=`, `>=`, `!=`) at depth zero.
fn find_assignment(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (idx, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'=' if depth <= 0 => {
                let next = bytes.get(idx + 1).copied();
                let prev = if idx > 0 { bytes.get(idx - 1).copied() } else { None };
                let compound = matches!(prev, Some(b'=' | b'!' | b'<' | b'>'));
                if !compound && !matches!(next, Some(b'=' | b'>')) {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_state_variable(text: &str, line: usize) -> Option<StateVariable> {
    let first = text.split(|c: char| !is_ident_char(c)).next().unwrap_or("");
    if NON_STATE_PREFIXES.contains(&first) {
        return None;
    }
    let declaration = match find_assignment(text) {
        Some(idx) => text[..idx].trim(),
        None => text.trim(),
    };
    let tokens: Vec<&str> = declaration.split_whitespace().collect();
    if tokens.iter().any(|t| *t == "constant" || *t == "immutable") {
        return None;
    }
    let name = *tokens.last()?;
    if tokens.len() < 2 || !is_identifier(name) {
        return None;
    }

    let type_end = declaration.len() - name.len();
    let mut type_name = declaration[..type_end].trim().to_string();
    if let Some(open) = type_name.find('(').filter(|_| type_name.starts_with("mapping")) {
        if let Some(close) = find_matching(&type_name, open, b'(', b')') {
            type_name.truncate(close + 1);
        }
    } else {
        type_name = type_name.split_whitespace().next().unwrap_or("").to_string();
    }

    let kind = if type_name.starts_with("mapping") {
        VariableKind::Mapping
    } else if type_name.contains('[') {
        VariableKind::Array
    } else {
        VariableKind::Scalar
    };

    Some(StateVariable {
        name: name.to_string(),
        type_name,
        kind,
        line,
        inherited_from: None,
    })
}

/// Index of the `)` closing a leading `for (...)` / `while (...)` header.
fn split_loop_header(text: &str) -> Option<usize> {
    let m = LOOP_HEADER.find(text)?;
    find_matching(text, m.end() - 1, b'(', b')')
}

fn classify_modifier(draft: &ModifierDraft) -> GuardKind {
    if is_well_known_guard(&draft.name) {
        return GuardKind::Mutex;
    }
    let statements = &draft.body.statements;
    let Some(placeholder) = statements.iter().position(|s| s.text == "_") else {
        return GuardKind::Unknown;
    };

    let guard_names = |slice: &[RawStatement]| -> HashSet<String> {
        slice
            .iter()
            .filter_map(|s| GUARD_ASSIGNMENT.captures(&s.text).map(|c| c[1].to_string()))
            .collect()
    };
    let before = guard_names(&statements[..placeholder]);
    let after = guard_names(&statements[placeholder + 1..]);
    if before.intersection(&after).next().is_some() {
        return GuardKind::Mutex;
    }

    // Guard logic factored into helpers, e.g. `_nonReentrantBefore(); _; _nonReentrantAfter();`
    let calls_guard_helper = |slice: &[RawStatement]| {
        slice
            .iter()
            .any(|s| identifiers(&s.text).iter().any(|(_, word)| is_well_known_guard(word)))
    };
    if calls_guard_helper(&statements[..placeholder]) && calls_guard_helper(&statements[placeholder + 1..]) {
        return GuardKind::Mutex;
    }
    GuardKind::Unknown
}

/// Contract indices reachable through `is` clauses, the contract itself first.
fn lineage(drafts: &[ContractDraft], index: &HashMap<&str, usize>, start: usize) -> Vec<usize> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(idx) = queue.pop_front() {
        if !seen.insert(idx) {
            continue;
        }
        order.push(idx);
        for base in &drafts[idx].inherits {
            if let Some(&base_idx) = index.get(base.as_str()) {
                queue.push_back(base_idx);
            }
        }
    }
    order
}

fn resolve_contracts(drafts: &[ContractDraft]) -> Vec<Contract> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (idx, draft) in drafts.iter().enumerate() {
        index.entry(draft.name.as_str()).or_insert(idx);
    }
    let type_names: HashSet<String> = drafts
        .iter()
        .flat_map(|d| d.type_names.iter().cloned())
        .collect();
    let guard_kinds: Vec<Vec<GuardKind>> = drafts
        .iter()
        .map(|d| d.modifiers.iter().map(classify_modifier).collect())
        .collect();

    drafts
        .iter()
        .enumerate()
        .map(|(idx, draft)| {
            let chain = lineage(drafts, &index, idx);

            let mut state_variables = draft.state_variables.clone();
            let mut available: HashMap<&str, GuardKind> = HashMap::new();
            for &member in &chain {
                let source = &drafts[member];
                if member != idx {
                    for var in &source.state_variables {
                        if !state_variables.iter().any(|v| v.name == var.name) {
                            let mut inherited = var.clone();
                            inherited.inherited_from = Some(source.name.clone());
                            state_variables.push(inherited);
                        }
                    }
                }
                for (modifier, guard) in source.modifiers.iter().zip(&guard_kinds[member]) {
                    available.entry(modifier.name.as_str()).or_insert(*guard);
                }
            }

            let modifiers = draft
                .modifiers
                .iter()
                .zip(&guard_kinds[idx])
                .map(|(m, guard)| Modifier {
                    name: m.name.clone(),
                    line: m.line,
                    guard: *guard,
                })
                .collect();

            let functions = draft
                .functions
                .iter()
                .map(|f| build_function(f, &state_variables, &available, &type_names))
                .collect();

            Contract {
                name: draft.name.clone(),
                kind: draft.kind,
                line: draft.line,
                end_line: draft.end_line,
                inherits: draft.inherits.clone(),
                state_variables,
                modifiers,
                functions,
            }
        })
        .collect()
}

fn build_function(
    draft: &FunctionDraft,
    state_variables: &[StateVariable],
    available: &HashMap<&str, GuardKind>,
    type_names: &HashSet<String>,
) -> Function {
    let header = &draft.header;
    let modifiers = header
        .modifiers
        .iter()
        .map(|name| match available.get(name.as_str()) {
            Some(guard) => AppliedModifier {
                name: name.clone(),
                resolved: true,
                guard: *guard,
            },
            None => AppliedModifier {
                name: name.clone(),
                resolved: false,
                guard: if is_well_known_guard(name) {
                    GuardKind::Mutex
                } else {
                    GuardKind::Unknown
                },
            },
        })
        .collect();

    let mut classifier = StatementClassifier::new(state_variables, &header.parameters, type_names);
    let mut statements = Vec::with_capacity(draft.body.statements.len());
    let mut calls = Vec::new();
    let mut state_accesses = Vec::new();

    for (id, raw) in draft.body.statements.iter().enumerate() {
        let kind = match raw.role {
            RawRole::LoopEnd => StatementKind::LoopEnd,
            role => {
                let call = classifier.call_site(&raw.text);
                let accesses = classifier.state_accesses(&raw.text);
                let kind = if role == RawRole::LoopHeader {
                    StatementKind::LoopHeader
                } else {
                    match (&call, accesses.iter().any(|(_, k)| *k == AccessKind::Write)) {
                        (Some((CallKind::Delegate, _, _)), _) => StatementKind::DelegateCall,
                        (Some(_), _) => StatementKind::ExternalCall,
                        (None, true) => StatementKind::StateWrite,
                        (None, false) if !accesses.is_empty() => StatementKind::StateRead,
                        _ => StatementKind::Other,
                    }
                };
                if let Some((call_kind, target, forwards_value)) = call {
                    calls.push(CallSite {
                        stmt: id,
                        line: raw.line,
                        kind: call_kind,
                        target,
                        forwards_value,
                        enclosing_loop: raw.enclosing_loop,
                    });
                }
                state_accesses.extend(accesses.into_iter().map(|(variable, access)| StateAccess {
                    stmt: id,
                    line: raw.line,
                    variable,
                    kind: access,
                }));
                kind
            }
        };
        statements.push(Statement {
            id,
            line: raw.line,
            kind,
            text: raw.text.clone(),
            enclosing_loop: raw.enclosing_loop,
        });
    }

    Function {
        name: header.name.clone(),
        kind: header.kind,
        visibility: header.visibility,
        payable: header.payable,
        read_only: header.read_only,
        modifiers,
        parameters: header.parameters.clone(),
        statements,
        calls,
        state_accesses,
        loops: draft.body.loops.clone(),
        start_line: draft.start_line,
        end_line: draft.end_line,
    }
}

/// Lexical classifier for one function body.
struct StatementClassifier {
    state_variables: HashSet<String>,
    address_like: HashSet<String>,
    shadowed: HashSet<String>,
}

impl StatementClassifier {
    fn new(state_variables: &[StateVariable], parameters: &[Parameter], type_names: &HashSet<String>) -> Self {
        let is_address_like = |type_name: &str| {
            let value_type = match type_name.rfind("=>") {
                Some(idx) => type_name[idx + 2..].trim().trim_end_matches(')').trim(),
                None => type_name.trim(),
            };
            let base = value_type.trim_end_matches("[]").trim();
            // `Counters.Counter`, `EnumerableSet.AddressSet`: library structs, not contracts.
            if base.contains('.') {
                return false;
            }
            base.starts_with("address")
                || (base.starts_with(|c: char| c.is_ascii_uppercase()) && !type_names.contains(base))
        };

        let parameter_names: HashSet<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
        let mut address_like: HashSet<String> = state_variables
            .iter()
            .filter(|v| !parameter_names.contains(v.name.as_str()) && is_address_like(&v.type_name))
            .map(|v| v.name.clone())
            .collect();
        address_like.extend(
            parameters
                .iter()
                .filter(|p| is_address_like(&p.type_name))
                .map(|p| p.name.clone()),
        );

        Self {
            state_variables: state_variables
                .iter()
                .filter(|v| !parameter_names.contains(v.name.as_str()))
                .map(|v| v.name.clone())
                .collect(),
            address_like,
            shadowed: HashSet::new(),
        }
    }

    /// The strongest call in `text`: delegate, then low-level, then value transfers, then typed calls.
    fn call_site(&self, text: &str) -> Option<(CallKind, CallTarget, bool)> {
        if let Some(m) = DELEGATE_CALL.find(text) {
            return Some((CallKind::Delegate, call_target(receiver_before(text, m.start())), false));
        }
        if let Some(m) = LOW_LEVEL_CALL.find(text) {
            let forwards_value = VALUE_OPTION.is_match(&text[m.start()..]);
            return Some((
                CallKind::LowLevel,
                call_target(receiver_before(text, m.start())),
                forwards_value,
            ));
        }
        if let Some(m) = SEND_CALL.find(text) {
            return Some((CallKind::Send, call_target(receiver_before(text, m.start())), true));
        }
        if let Some(m) = TRANSFER_CALL.find(text) {
            let target = call_target(receiver_before(text, m.start()));
            let arguments = find_matching(text, m.end() - 1, b'(', b')')
                .map(|close| split_top_level(&text[m.end()..close], ',').len())
                .unwrap_or(1);
            // `payable(x).transfer(amount)` moves ether; `token.transfer(to, amount)` is a token call.
            return Some(if arguments == 1 {
                (CallKind::Transfer, target, true)
            } else {
                (CallKind::Interface, target, false)
            });
        }
        for caps in INTERFACE_CAST_CALL.captures_iter(text) {
            if LOW_LEVEL_MEMBERS.contains(&&caps[3]) {
                continue;
            }
            return Some((CallKind::Interface, call_target(caps[2].trim()), false));
        }
        for caps in MEMBER_CALL.captures_iter(text) {
            let (Some(whole), receiver, member) = (caps.get(0), &caps[1], &caps[2]) else {
                continue;
            };
            let preceded_by_dot = text[..whole.start()].trim_end().ends_with('.');
            if preceded_by_dot
                || LOW_LEVEL_MEMBERS.contains(&member)
                || ARRAY_MEMBERS.contains(&member)
                || !self.address_like.contains(receiver)
            {
                continue;
            }
            return Some((CallKind::Interface, call_target(receiver), false));
        }
        None
    }

    /// State variables touched by `text`, each with read or write access.
    fn state_accesses(&mut self, text: &str) -> Vec<(String, AccessKind)> {
        let words = identifiers(text);
        let tuple_targets = tuple_assignment_targets(text);
        let mut accesses: Vec<(String, AccessKind)> = Vec::new();

        for (pos, &(offset, word)) in words.iter().enumerate() {
            if !self.state_variables.contains(word) || self.shadowed.contains(word) {
                continue;
            }
            let before = text[..offset].trim_end();
            if before.ends_with('.') {
                continue;
            }
            if pos > 0 && is_local_declaration(text, words[pos - 1], offset) {
                self.shadowed.insert(word.to_string());
                continue;
            }

            let (rest_idx, last_member) = skip_accessors(text, offset + word.len());
            let rest = text[rest_idx..].trim_start();
            let deleted = before.ends_with("delete")
                && !before[..before.len() - "delete".len()].ends_with(is_ident_char);
            let is_write = is_assignment(rest)
                || rest.starts_with("++")
                || rest.starts_with("--")
                || before.ends_with("++")
                || before.ends_with("--")
                || deleted
                || (matches!(last_member, Some("push" | "pop")) && rest.starts_with('('))
                || (tuple_targets.as_ref().is_some_and(|range| range.contains(&offset))
                    && (rest.starts_with(',') || rest.starts_with(')')));

            let kind = if is_write { AccessKind::Write } else { AccessKind::Read };
            if !accesses.iter().any(|(v, k)| v == word && *k == kind) {
                accesses.push((word.to_string(), kind));
            }
        }
        accesses
    }
}

/// Byte range inside the parentheses of a destructuring assignment such as `(a, b) = f();`.
fn tuple_assignment_targets(text: &str) -> Option<std::ops::Range<usize>> {
    let open = text.len() - text.trim_start().len();
    if !text[open..].starts_with('(') {
        return None;
    }
    let close = find_matching(text, open, b'(', b')')?;
    let eq = find_assignment(text)?;
    let between = text.get(close + 1..eq)?;
    if between.trim().is_empty() {
        Some(open + 1..close)
    } else {
        None
    }
}

/// True when `word` at `offset` is being declared as a local, e.g. `uint256 balance = ...`.
fn is_local_declaration(text: &str, previous: (usize, &str), offset: usize) -> bool {
    let (prev_offset, prev_word) = previous;
    let gap = &text[prev_offset + prev_word.len()..offset];
    let is_type_word = DECLARATION_WORDS.contains(&prev_word)
        || prev_word.starts_with("uint")
        || prev_word.starts_with("int")
        || prev_word.starts_with("bytes")
        || matches!(prev_word, "address" | "bool" | "string" | "payable");
    is_type_word && gap.chars().all(|c| c.is_whitespace() || c == '[' || c == ']')
}

/// Skips `[index]` and `.member` accessors; returns the resume index and the last member name.
fn skip_accessors(text: &str, mut idx: usize) -> (usize, Option<&str>) {
    let mut last_member = None;
    loop {
        let trimmed_start = idx + (text[idx..].len() - text[idx..].trim_start().len());
        let rest = &text[trimmed_start..];
        if rest.starts_with('[') {
            match find_matching(text, trimmed_start, b'[', b']') {
                Some(close) => idx = close + 1,
                None => return (idx, last_member),
            }
        } else if let Some(after_dot) = rest.strip_prefix('.') {
            let member_start = trimmed_start + 1 + (after_dot.len() - after_dot.trim_start().len());
            let member_len = text[member_start..]
                .find(|c: char| !is_ident_char(c))
                .unwrap_or(text.len() - member_start);
            if member_len == 0 {
                return (idx, last_member);
            }
            last_member = Some(&text[member_start..member_start + member_len]);
            idx = member_start + member_len;
        } else {
            return (idx, last_member);
        }
    }
}

fn is_assignment(rest: &str) -> bool {
    const COMPOUND: &[&str] = &["+=", "-=", "*=", "/=", "%=", "|=", "&=", "^=", "<<=", ">>="];
    (rest.starts_with('=') && !rest.starts_with("==") && !rest.starts_with("=>"))
        || COMPOUND.iter().any(|op| rest.starts_with(op))
}

/// The receiver expression ending right before the `.` at `dot_idx`.
fn receiver_before(text: &str, dot_idx: usize) -> &str {
    let bytes = text.as_bytes();
    let mut end = dot_idx;
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let mut start = end;
    while start > 0 {
        let b = bytes[start - 1];
        let matched = match b {
            b')' => find_matching_backwards(text, start - 1, b'(', b')'),
            b']' => find_matching_backwards(text, start - 1, b'[', b']'),
            _ if is_ident_char(b as char) || b == b'.' => Some(start - 1),
            _ => None,
        };
        match matched {
            Some(idx) => start = idx,
            None => break,
        }
    }
    text[start..end].trim()
}

fn call_target(receiver: &str) -> CallTarget {
    let mut receiver = receiver.trim();
    while let Some(caps) = CAST_WRAPPER.captures(receiver) {
        match caps.get(1) {
            Some(inner) if find_matching(receiver, receiver.find('(').unwrap_or(0), b'(', b')') == Some(receiver.len() - 1) => {
                receiver = inner.as_str().trim();
            }
            _ => break,
        }
    }
    if receiver == "msg.sender" {
        return CallTarget::MsgSender;
    }
    let path_end = receiver.find('[').unwrap_or(receiver.len());
    let path = &receiver[..path_end];
    if !path.is_empty() && path.split('.').all(is_identifier) {
        CallTarget::Named(receiver.to_string())
    } else {
        CallTarget::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Contract {
        let mut contracts = SolidityParser::parse(source).unwrap();
        assert_eq!(contracts.len(), 1, "expected exactly one contract");
        contracts.remove(0)
    }

    #[test]
    fn test_parse_simple_contract() {
        let contract = parse_one(
            r#"
contract Simple {
    uint256 public value;

    function setValue(uint256 _value) public {
        value = _value;
    }
}
"#,
        );
        assert_eq!(contract.name, "Simple");
        assert_eq!(contract.kind, ContractKind::Contract);
        assert_eq!(contract.functions.len(), 1);
        let function = &contract.functions[0];
        assert_eq!(function.name, "setValue");
        assert_eq!(function.start_line, 5);
        assert_eq!(function.end_line, 7);
        assert_eq!(function.statements[0].kind, StatementKind::StateWrite);
        assert_eq!(function.state_accesses[0].variable, "value");
    }

    #[test]
    fn test_parse_state_variables() {
        let contract = parse_one(
            r#"
contract WithState {
    uint256 public balance;
    mapping(address => uint256) public balances;
    address private owner = address(0);
    uint256 constant FEE = 10;
    address immutable factory;
    uint256[] public history;
}
"#,
        );
        let names: Vec<&str> = contract.state_variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["balance", "balances", "owner", "history"]);
        assert_eq!(contract.state_variables[1].kind, VariableKind::Mapping);
        assert_eq!(contract.state_variables[1].type_name, "mapping(address => uint256)");
        assert_eq!(contract.state_variables[3].kind, VariableKind::Array);
    }

    #[test]
    fn test_parse_external_calls() {
        let contract = parse_one(
            r#"
contract WithCalls {
    function makeCall(address target) external {
        target.call{value: 1 ether}("");
    }

    function makeTransfer(address payable target) external {
        target.transfer(1 ether);
    }

    function makeSend() external {
        payable(msg.sender).send(1);
    }
}
"#,
        );
        for function in &contract.functions {
            assert_eq!(function.calls.len(), 1, "{}", function.name);
            assert!(function.calls[0].forwards_value);
        }
        let call = &contract.functions[0].calls[0];
        assert_eq!(call.kind, CallKind::LowLevel);
        assert_eq!(call.target, CallTarget::Named("target".to_string()));
        assert_eq!(contract.functions[1].calls[0].kind, CallKind::Transfer);
        assert_eq!(contract.functions[2].calls[0].target, CallTarget::MsgSender);
    }

    #[test]
    fn test_call_options_do_not_open_blocks() {
        let contract = parse_one(
            r#"
contract Bank {
    mapping(address => uint256) balances;
    function withdraw(uint256 amount) external {
        (bool ok, ) = msg.sender.call{
            value: amount
        }("");
        require(ok);
        balances[msg.sender] -= amount;
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert_eq!(function.calls.len(), 1);
        assert_eq!(function.calls[0].line, 5);
        let write = function
            .state_accesses
            .iter()
            .find(|a| a.kind == AccessKind::Write)
            .unwrap();
        assert_eq!(write.line, 9);
    }

    #[test]
    fn test_detect_loop() {
        let contract = parse_one(
            r#"
contract WithLoop {
    function loopCall(address[] calldata targets) external {
        for (uint i = 0; i < targets.length; i++) {
            targets[i].call("");
        }
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert_eq!(function.calls.len(), 1);
        let header = function.calls[0].enclosing_loop.expect("call should be inside loop");
        assert_eq!(function.statements[header].kind, StatementKind::LoopHeader);
        let range = function.loop_range(header).unwrap();
        assert_eq!((range.start_line, range.end_line), (4, 6));
        assert!(function.statements.iter().any(|s| s.kind == StatementKind::LoopEnd));
    }

    #[test]
    fn test_braceless_loop_body_is_inside_loop() {
        let contract = parse_one(
            r#"
contract Loopy {
    function pay(address[] memory to) external {
        for (uint i = 0; i < to.length; i++) payable(to[i]).transfer(1);
        msg.sender.call("");
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert_eq!(function.calls.len(), 2);
        assert!(function.calls[0].enclosing_loop.is_some());
        assert!(function.calls[1].enclosing_loop.is_none());
    }

    #[test]
    fn test_braceless_loop_body_on_next_line_keeps_its_line() {
        let contract = parse_one(
            r#"
contract Loopy {
    function pay(address[] memory to) external {
        for (uint i = 0; i < to.length; i++)
            payable(to[i]).transfer(1);
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert_eq!(function.calls.len(), 1);
        assert_eq!(function.calls[0].line, 5);
        let header = function.calls[0].enclosing_loop.unwrap();
        let range = function.loop_range(header).unwrap();
        assert_eq!((range.start_line, range.end_line), (4, 5));
    }

    #[test]
    fn test_parse_modifiers() {
        let contract = parse_one(
            r#"
contract WithModifiers {
    bool locked;
    address owner;
    modifier lockGuard() {
        require(!locked);
        locked = true;
        _;
        locked = false;
    }
    modifier onlyOwner() {
        require(msg.sender == owner);
        _;
    }

    function protectedCall() external lockGuard onlyOwner {
        msg.sender.call("");
    }

    function other() external whenNotPaused {}
}
"#,
        );
        assert_eq!(contract.modifier("lockGuard").unwrap().guard, GuardKind::Mutex);
        assert_eq!(contract.modifier("onlyOwner").unwrap().guard, GuardKind::Unknown);

        let protected = contract.function("protectedCall").unwrap();
        let names: Vec<&str> = protected.modifiers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["lockGuard", "onlyOwner"]);
        assert!(protected.has_mutex_guard());
        assert!(!protected.has_unresolved_modifiers());

        let other = contract.function("other").unwrap();
        assert!(other.has_unresolved_modifiers());
        assert!(!other.has_mutex_guard());
    }

    #[test]
    fn test_parse_inheritance_and_inherited_members() {
        let contracts = SolidityParser::parse(
            r#"
contract Base {
    uint256 status;
    modifier guarded2() { status = 2; _; status = 1; }
}
contract Child is Base, Ownable(msg.sender) {
    function run() external guarded2 {
        status = 5;
    }
}
"#,
        )
        .unwrap();
        let child = contracts.iter().find(|c| c.name == "Child").unwrap();
        assert_eq!(child.inherits, vec!["Base".to_string(), "Ownable".to_string()]);
        assert!(child.has_state_variable("status"));
        assert_eq!(child.state_variables[0].inherited_from.as_deref(), Some("Base"));
        let run = child.function("run").unwrap();
        assert!(run.has_mutex_guard());
        assert!(run.writes("status"));
    }

    #[test]
    fn test_special_functions_use_reserved_names() {
        let contract = parse_one(
            r#"
contract Special is Token {
    constructor(address t) Token("n") { }
    receive() external payable { }
    fallback() external { }
}
"#,
        );
        let names: Vec<&str> = contract.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["constructor", "receive", "fallback"]);
        assert!(contract.functions[0].modifiers.is_empty());
        assert_eq!(contract.functions[1].kind, FunctionKind::Receive);
        assert!(contract.functions[1].payable);
        assert_eq!(contract.functions[2].visibility, Visibility::External);
    }

    #[test]
    fn test_comments_and_strings_are_not_calls() {
        let contract = parse_one(
            r#"
contract Quiet {
    string note;
    function f() external {
        // msg.sender.call("");
        note = "target.delegatecall(data)";
        /* x.send(1); { */
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert!(function.calls.is_empty());
        assert!(function.statements.iter().all(|s| s.kind != StatementKind::DelegateCall));
    }

    #[test]
    fn test_interface_calls_on_typed_receivers() {
        let contract = parse_one(
            r#"
contract Vault {
    IERC20 token;
    struct Info { uint a; }
    Info info;
    function pull(address from, uint amt) external {
        token.transferFrom(from, address(this), amt);
        IOracle(from).update();
        info.touch();
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert_eq!(function.calls.len(), 2);
        assert!(function.calls.iter().all(|c| c.kind == CallKind::Interface));
        assert_eq!(function.calls[1].target, CallTarget::Named("from".to_string()));
    }

    #[test]
    fn test_library_struct_members_are_not_calls() {
        let contract = parse_one(
            r#"
contract Minter {
    using Counters for Counters.Counter;
    using EnumerableSet for EnumerableSet.AddressSet;
    Counters.Counter private _ids;
    EnumerableSet.AddressSet holders;
    function mint() external {
        _ids.increment();
        holders.add(msg.sender);
    }
}
"#,
        );
        assert_eq!(contract.state_variables.len(), 2);
        assert_eq!(contract.state_variables[0].type_name, "Counters.Counter");
        assert!(contract.functions[0].calls.is_empty());
    }

    #[test]
    fn test_local_shadowing_is_not_state_access() {
        let contract = parse_one(
            r#"
contract Shadow {
    uint256 total;
    function f(uint256 amount) external {
        uint256 total = amount;
        total = total + 1;
    }
}
"#,
        );
        assert!(contract.functions[0].state_accesses.is_empty());
    }

    #[test]
    fn test_write_forms() {
        let contract = parse_one(
            r#"
contract Writes {
    uint256 count;
    uint256[] list;
    mapping(address => uint256) m;
    address[] holders;
    function f() external {
        count++;
        list.push(1);
        delete m[msg.sender];
        if (count == 2) { }
        holders.push(msg.sender);
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert!(function.calls.is_empty());
        assert!(function.writes("holders"));
        assert!(function.writes("count"));
        assert!(function.writes("list"));
        assert!(function.writes("m"));
        let reads: Vec<_> = function
            .state_accesses
            .iter()
            .filter(|a| a.kind == AccessKind::Read)
            .collect();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].line, 11);
    }

    #[test]
    fn test_tuple_destructuring_writes() {
        let contract = parse_one(
            r#"
contract Tuples {
    uint256 a;
    mapping(uint256 => uint256) m;
    uint256 c;
    function f() external {
        (a, m[1]) = (1, 2);
        (bool ok, ) = msg.sender.call("");
        if ((c) == 1) { }
    }
}
"#,
        );
        let function = &contract.functions[0];
        assert!(function.writes("a"));
        assert!(function.writes("m"));
        assert!(!function.writes("c"));
    }

    #[test]
    fn test_multiple_contracts_and_interfaces() {
        let contracts = SolidityParser::parse(
            r#"
pragma solidity ^0.8.0;
interface IThing {
    function f() external;
}
library Lib {
    function g(uint a) internal pure returns (uint) { return a; }
}
contract A { function h() public {} }
"#,
        )
        .unwrap();
        let kinds: Vec<ContractKind> = contracts.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ContractKind::Interface, ContractKind::Library, ContractKind::Contract]);
        assert!(contracts[0].functions.is_empty());
        assert_eq!(contracts[1].functions[0].visibility, Visibility::Internal);
    }

    #[test]
    fn test_unclosed_function_is_parse_error() {
        let err = SolidityParser::parse("contract A {\n function f() public {\n x = 1;\n").unwrap_err();
        match err {
            ScanError::Parse { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("function `f`"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_contract_and_stray_brace() {
        let err = SolidityParser::parse("contract A {\n uint x;\n").unwrap_err();
        assert!(matches!(err, ScanError::Parse { line: 1, .. }));
        assert!(err.to_string().contains("contract `A`"));

        let err = SolidityParser::parse("contract A { }\n}\n").unwrap_err();
        assert!(matches!(err, ScanError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_unbalanced_parentheses_is_parse_error() {
        let err = SolidityParser::parse("contract A {\n function f() public {\n g(1;\n }\n}\n").unwrap_err();
        assert!(matches!(err, ScanError::Parse { line: 3, .. }));
    }
}
