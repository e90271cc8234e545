use std::collections::HashMap;

use ferroposh_psrp::PsValue;
use tracing::debug;

use super::{EngineError, Invocation, ScriptEngine};
use crate::cmdlet::{PsCmdlet, WriteError};

/// The built-in script engine: a small, deterministic command language
/// ("shim") covering the pipeline surface: output, host writes, error
/// records, input iteration, loops, and host prompts.
///
/// ```text
/// out 1 + 1                    # write an output object
/// say 'working'                # host write-line
/// fail 'broke: ' + $reason     # non-terminating error record
/// $x = 40 + 2                  # assignment
/// foreach $item { out $item }  # drain pipeline input
/// while $n { $n = $n - 1 }     # conditional loop
/// loop { say 'x' }             # infinite loop (until Signal)
/// $cred = credential('cap', 'msg')
/// $line = readline()
/// ```
///
/// Named parameters bind as `$name`, positional arguments as `$0`,
/// `$1`, and so on. The whole script parses before anything executes,
/// so a syntax error never produces partial output.
#[derive(Debug, Default)]
pub struct ShimEngine;

impl ShimEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for ShimEngine {
    fn run(
        &self,
        script: &str,
        invocation: Invocation<'_>,
        cmdlet: &PsCmdlet,
    ) -> Result<(), EngineError> {
        let statements = parse(script).map_err(|e| EngineError::Parse {
            message: e.message,
            detail: Some(format!("at line {}, column {}", e.line, e.column)),
        })?;
        debug!(statements = statements.len(), "script parsed");

        let mut vars: HashMap<String, PsValue> = HashMap::new();
        for (index, value) in invocation.args.iter().enumerate() {
            vars.insert(index.to_string(), value.clone());
        }
        for (name, value) in &invocation.params {
            vars.insert(name.clone(), value.clone());
        }

        let mut exec = Exec {
            cmdlet,
            vars,
            input: invocation.input,
        };
        exec.run(&statements)
    }
}

// ---------------------------------------------------------------------
// Lexing

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Var(String),
    Int(i64),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Assign,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

#[derive(Debug)]
struct ParseFail {
    message: String,
    line: usize,
    column: usize,
}

fn lex(script: &str) -> Result<Vec<Spanned>, ParseFail> {
    let chars: Vec<char> = script.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;
    let mut column = 1;

    let fail = |message: String, line: usize, column: usize| ParseFail {
        message,
        line,
        column,
    };

    while pos < chars.len() {
        let c = chars[pos];
        let (tok_line, tok_column) = (line, column);

        let advance = |pos: &mut usize, line: &mut usize, column: &mut usize| {
            if chars[*pos] == '\n' {
                *line += 1;
                *column = 1;
            } else {
                *column += 1;
            }
            *pos += 1;
        };

        match c {
            ' ' | '\t' | '\r' | '\n' => {
                advance(&mut pos, &mut line, &mut column);
                continue;
            }
            '#' => {
                while pos < chars.len() && chars[pos] != '\n' {
                    advance(&mut pos, &mut line, &mut column);
                }
                continue;
            }
            '\'' | '"' => {
                let quote = c;
                advance(&mut pos, &mut line, &mut column);
                let mut text = String::new();
                loop {
                    if pos >= chars.len() {
                        return Err(fail(
                            "unterminated string literal".to_string(),
                            tok_line,
                            tok_column,
                        ));
                    }
                    if chars[pos] == quote {
                        advance(&mut pos, &mut line, &mut column);
                        break;
                    }
                    text.push(chars[pos]);
                    advance(&mut pos, &mut line, &mut column);
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    line: tok_line,
                    column: tok_column,
                });
                continue;
            }
            '$' => {
                advance(&mut pos, &mut line, &mut column);
                let mut name = String::new();
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    name.push(chars[pos]);
                    advance(&mut pos, &mut line, &mut column);
                }
                if name.is_empty() {
                    return Err(fail(
                        "'$' must be followed by a variable name".to_string(),
                        tok_line,
                        tok_column,
                    ));
                }
                tokens.push(Spanned {
                    token: Token::Var(name),
                    line: tok_line,
                    column: tok_column,
                });
                continue;
            }
            _ if c.is_ascii_digit() => {
                let mut digits = String::new();
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    digits.push(chars[pos]);
                    advance(&mut pos, &mut line, &mut column);
                }
                let value = digits.parse().map_err(|_| {
                    fail(
                        format!("integer literal out of range: {digits}"),
                        tok_line,
                        tok_column,
                    )
                })?;
                tokens.push(Spanned {
                    token: Token::Int(value),
                    line: tok_line,
                    column: tok_column,
                });
                continue;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    word.push(chars[pos]);
                    advance(&mut pos, &mut line, &mut column);
                }
                tokens.push(Spanned {
                    token: Token::Word(word),
                    line: tok_line,
                    column: tok_column,
                });
                continue;
            }
            _ => {}
        }

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            '=' => Token::Assign,
            other => {
                return Err(fail(
                    format!("unexpected character {other:?}"),
                    tok_line,
                    tok_column,
                ))
            }
        };
        advance(&mut pos, &mut line, &mut column);
        tokens.push(Spanned {
            token,
            line: tok_line,
            column: tok_column,
        });
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------
// Parsing

#[derive(Debug, Clone)]
enum Stmt {
    Out(Expr),
    Say(Expr),
    Fail(Expr),
    Assign(String, Expr),
    Foreach(String, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    Loop(Vec<Stmt>),
}

#[derive(Debug, Clone)]
enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Var(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Credential(Box<Expr>, Box<Expr>),
    ReadLine,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

fn parse(script: &str) -> Result<Vec<Stmt>, ParseFail> {
    let mut parser = Parser {
        tokens: lex(script)?,
        pos: 0,
    };
    let statements = parser.block_body(false)?;
    Ok(statements)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn fail_here(&self, message: String) -> ParseFail {
        let (line, column) = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or((0, 0), |s| (s.line, s.column));
        ParseFail {
            message,
            line,
            column,
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseFail> {
        match self.next() {
            Some(spanned) if spanned.token == *expected => Ok(()),
            Some(spanned) => Err(ParseFail {
                message: format!("expected {what}, found {:?}", spanned.token),
                line: spanned.line,
                column: spanned.column,
            }),
            None => Err(self.fail_here(format!("expected {what}, found end of script"))),
        }
    }

    /// Parse statements until `}` (inside a block) or end of input.
    fn block_body(&mut self, inside_block: bool) -> Result<Vec<Stmt>, ParseFail> {
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                None => {
                    if inside_block {
                        return Err(self.fail_here("unterminated block: missing '}'".to_string()));
                    }
                    return Ok(statements);
                }
                Some(Token::RBrace) => {
                    if inside_block {
                        self.next();
                        return Ok(statements);
                    }
                    return Err(self.fail_here("unmatched '}'".to_string()));
                }
                _ => statements.push(self.statement()?),
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseFail> {
        self.expect(&Token::LBrace, "'{'")?;
        self.block_body(true)
    }

    fn statement(&mut self) -> Result<Stmt, ParseFail> {
        let Some(spanned) = self.next() else {
            return Err(self.fail_here("expected a statement".to_string()));
        };

        match spanned.token {
            Token::Word(word) => match word.as_str() {
                "out" => Ok(Stmt::Out(self.expression()?)),
                "say" => Ok(Stmt::Say(self.expression()?)),
                "fail" => Ok(Stmt::Fail(self.expression()?)),
                "foreach" => {
                    let variable = match self.next() {
                        Some(Spanned {
                            token: Token::Var(name),
                            ..
                        }) => name,
                        _ => {
                            return Err(self.fail_here(
                                "foreach needs a loop variable like '$item'".to_string(),
                            ))
                        }
                    };
                    Ok(Stmt::Foreach(variable, self.block()?))
                }
                "while" => {
                    let condition = self.expression()?;
                    Ok(Stmt::While(condition, self.block()?))
                }
                "loop" => Ok(Stmt::Loop(self.block()?)),
                other => Err(ParseFail {
                    message: format!("unknown statement '{other}'"),
                    line: spanned.line,
                    column: spanned.column,
                }),
            },
            Token::Var(name) => {
                self.expect(&Token::Assign, "'=' after variable")?;
                Ok(Stmt::Assign(name, self.expression()?))
            }
            other => Err(ParseFail {
                message: format!("expected a statement, found {other:?}"),
                line: spanned.line,
                column: spanned.column,
            }),
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseFail> {
        let mut left = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.next();
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => return Ok(left),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ParseFail> {
        let mut left = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    left = Expr::Mul(Box::new(left), Box::new(self.factor()?));
                }
                Some(Token::Slash) => {
                    self.next();
                    left = Expr::Div(Box::new(left), Box::new(self.factor()?));
                }
                _ => return Ok(left),
            }
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseFail> {
        let Some(spanned) = self.next() else {
            return Err(self.fail_here("expected an expression".to_string()));
        };

        match spanned.token {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::Var(name) => Ok(Expr::Var(name)),
            Token::Minus => Ok(Expr::Neg(Box::new(self.factor()?))),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Word(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "readline" => {
                    self.expect(&Token::LParen, "'(' after readline")?;
                    self.expect(&Token::RParen, "')'")?;
                    Ok(Expr::ReadLine)
                }
                "credential" => {
                    self.expect(&Token::LParen, "'(' after credential")?;
                    let caption = self.expression()?;
                    self.expect(&Token::Comma, "','")?;
                    let message = self.expression()?;
                    self.expect(&Token::RParen, "')'")?;
                    Ok(Expr::Credential(Box::new(caption), Box::new(message)))
                }
                other => Err(ParseFail {
                    message: format!("unknown name '{other}' in expression"),
                    line: spanned.line,
                    column: spanned.column,
                }),
            },
            other => Err(ParseFail {
                message: format!("expected an expression, found {other:?}"),
                line: spanned.line,
                column: spanned.column,
            }),
        }
    }
}

// ---------------------------------------------------------------------
// Execution

struct Exec<'a> {
    cmdlet: &'a PsCmdlet,
    vars: HashMap<String, PsValue>,
    input: &'a mut dyn Iterator<Item = PsValue>,
}

impl Exec<'_> {
    fn run(&mut self, statements: &[Stmt]) -> Result<(), EngineError> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Stmt) -> Result<(), EngineError> {
        match statement {
            Stmt::Out(expr) => {
                let value = self.eval(expr)?;
                self.cmdlet
                    .write_output(value)
                    .map_err(EngineError::from_facade)
            }
            Stmt::Say(expr) => {
                let value = self.eval(expr)?;
                self.cmdlet
                    .write_host(&value.to_string())
                    .map_err(EngineError::from_facade)
            }
            Stmt::Fail(expr) => {
                let value = self.eval(expr)?;
                self.cmdlet
                    .write_error(WriteError::builder().message(value.to_string()).build())
                    .map_err(EngineError::from_facade)
            }
            Stmt::Assign(name, expr) => {
                let value = self.eval(expr)?;
                self.vars.insert(name.clone(), value);
                Ok(())
            }
            Stmt::Foreach(variable, body) => {
                while let Some(item) = self.input.next() {
                    self.vars.insert(variable.clone(), item);
                    self.run(body)?;
                }
                Ok(())
            }
            Stmt::While(condition, body) => {
                while self.truthy(condition)? {
                    self.run(body)?;
                }
                Ok(())
            }
            Stmt::Loop(body) => loop {
                self.run(body)?;
            },
        }
    }

    fn truthy(&mut self, condition: &Expr) -> Result<bool, EngineError> {
        match self.eval(condition)? {
            PsValue::Bool(b) => Ok(b),
            PsValue::I32(v) => Ok(v != 0),
            PsValue::I64(v) => Ok(v != 0),
            other => Err(runtime(format!(
                "cannot use a {} as a condition",
                other.type_name()
            ))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<PsValue, EngineError> {
        match expr {
            Expr::Int(value) => Ok(PsValue::I64(*value)),
            Expr::Str(value) => Ok(PsValue::str(value.clone())),
            Expr::Bool(value) => Ok(PsValue::Bool(*value)),
            Expr::Var(name) => self.vars.get(name).cloned().ok_or_else(|| {
                runtime(format!("undefined variable '${name}'"))
            }),
            Expr::Neg(inner) => {
                let value = self.number(inner)?;
                Ok(PsValue::I64(-value))
            }
            Expr::Add(left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                match (&left, &right) {
                    (PsValue::Str(_), _) | (_, PsValue::Str(_)) => {
                        Ok(PsValue::str(format!("{left}{right}")))
                    }
                    _ => Ok(PsValue::I64(as_number(&left)? + as_number(&right)?)),
                }
            }
            Expr::Sub(left, right) => Ok(PsValue::I64(self.number(left)? - self.number(right)?)),
            Expr::Mul(left, right) => Ok(PsValue::I64(self.number(left)? * self.number(right)?)),
            Expr::Div(left, right) => {
                let divisor = self.number(right)?;
                if divisor == 0 {
                    return Err(runtime("division by zero".to_string()));
                }
                Ok(PsValue::I64(self.number(left)? / divisor))
            }
            Expr::ReadLine => self
                .cmdlet
                .host()
                .read_line()
                .map(PsValue::Str)
                .map_err(EngineError::from_facade),
            Expr::Credential(caption, message) => {
                let caption = self.eval(caption)?.to_string();
                let message = self.eval(message)?.to_string();
                self.cmdlet
                    .host()
                    .prompt_for_credential(&caption, &message, None, None)
                    .map(|credential| credential.to_ps_value())
                    .map_err(EngineError::from_facade)
            }
        }
    }

    fn number(&mut self, expr: &Expr) -> Result<i64, EngineError> {
        let value = self.eval(expr)?;
        as_number(&value)
    }
}

fn as_number(value: &PsValue) -> Result<i64, EngineError> {
    value.as_i64().ok_or_else(|| {
        runtime(format!(
            "cannot use a {} as a number",
            value.type_name()
        ))
    })
}

fn runtime(message: String) -> EngineError {
    EngineError::Runtime {
        message,
        detail: None,
    }
}

#[cfg(test)]
mod exec_tests {
    use super::*;
    use crate::connection::Connection;
    use crate::host::PsHostFacade;
    use crate::transport::Outbound;
    use crate::workers::{HostRegistry, InputBuffer, InputCursor};
    use crate::{Invocation, Packet, PacketKind, ScriptEngine, ServerError};
    use ferroposh_psrp::{
        CreatePipeline, Defragmenter, Destination, Fragmenter, HostInfo, HostResponse,
        MessageType, PipelineCommand, PipelineOutput, PowerShellPipeline, PsCredential,
        PsrpMessage, PsrpPayload, ServerPipeline, ServerRunspacePool, StreamType,
    };
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Captures everything the server side writes, for assertions.
    #[derive(Default)]
    struct CaptureConnection {
        written: Mutex<Vec<u8>>,
    }

    impl Connection for CaptureConnection {
        fn open(&self) -> Result<(), ServerError> {
            Ok(())
        }

        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn send(&self, data: &[u8]) -> std::io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn close(&self) {}
    }

    struct Harness {
        pipeline: ServerPipeline,
        capture: Arc<CaptureConnection>,
        outbound: Arc<Outbound>,
        registry: Arc<HostRegistry>,
        input: Arc<InputBuffer>,
    }

    impl Harness {
        fn new(host_ui: bool) -> Self {
            let pool = ServerRunspacePool::new();
            let pipeline = ServerPipeline::new(&pool, Uuid::new_v4()).unwrap();

            // Attach metadata the way the codec does: by parsing a real
            // CreatePipeline message addressed at the pipeline.
            let create = CreatePipeline::builder()
                .powershell(
                    PowerShellPipeline::builder()
                        .commands(vec![PipelineCommand::script("out 0")])
                        .build(),
                )
                .host_info(Some(
                    HostInfo::builder()
                        .is_host_null(!host_ui)
                        .is_host_ui_null(!host_ui)
                        .is_host_raw_ui_null(!host_ui)
                        .use_runspace_host(false)
                        .build(),
                ))
                .build();
            let message = PsrpMessage::from_body(
                &create,
                Destination::Server,
                pool.id(),
                Some(pipeline.id()),
            )
            .unwrap();
            let payload = PsrpPayload::new(
                Fragmenter::new(32_768).fragment(&message),
                StreamType::Default,
                Some(pipeline.id()),
            );
            pool.receive_data(&payload).unwrap();
            while pool.next_event().is_some() {}

            let capture = Arc::new(CaptureConnection::default());
            let outbound = Arc::new(Outbound::new(
                Arc::clone(&capture) as Arc<dyn Connection>
            ));

            pipeline.start().unwrap();
            Self {
                pipeline,
                capture,
                outbound,
                registry: Arc::new(HostRegistry::new()),
                input: Arc::new(InputBuffer::new()),
            }
        }

        fn run(&self, script: &str) -> Result<(), EngineError> {
            self.run_with(script, Vec::new(), HashMap::new())
        }

        fn run_with(
            &self,
            script: &str,
            args: Vec<PsValue>,
            params: HashMap<String, PsValue>,
        ) -> Result<(), EngineError> {
            let runspace_registry = Arc::new(HostRegistry::new());
            let host = PsHostFacade::new(
                &self.pipeline,
                &self.registry,
                &runspace_registry,
                &self.outbound,
            );
            let cmdlet =
                crate::cmdlet::PsCmdlet::new(self.pipeline.clone(), Arc::clone(&self.outbound), host);
            let mut cursor = InputCursor::new(Arc::clone(&self.input));

            ShimEngine::new().run(
                script,
                Invocation {
                    args,
                    params,
                    input: &mut cursor,
                },
                &cmdlet,
            )
        }

        /// Decode every Data packet written so far and return the
        /// pipeline output values, in order.
        fn outputs(&self) -> Vec<PsValue> {
            let written = self.capture.written.lock().unwrap().clone();
            let mut defragmenter = Defragmenter::new();
            let mut outputs = Vec::new();

            for raw in written.split(|&b| b == b'\n').filter(|raw| !raw.is_empty()) {
                let packet = Packet::parse(raw).unwrap();
                if packet.kind != PacketKind::Data {
                    continue;
                }
                for message in defragmenter.defragment(&packet.payload).unwrap() {
                    if message.message_type == MessageType::PipelineOutput {
                        outputs.push(
                            PipelineOutput::try_from(&message.body().unwrap())
                                .unwrap()
                                .data,
                        );
                    }
                }
            }
            outputs
        }
    }

    #[test]
    fn arithmetic_and_string_concatenation() {
        let harness = Harness::new(false);
        harness
            .run("$x = 2 + 3 * 4\nout $x\nout 'n=' + $x\nout -$x")
            .unwrap();
        assert_eq!(
            harness.outputs(),
            vec![
                PsValue::I64(14),
                PsValue::str("n=14"),
                PsValue::I64(-14),
            ]
        );
    }

    #[test]
    fn while_loop_counts_down() {
        let harness = Harness::new(false);
        harness
            .run("$n = 3\nwhile $n { out $n\n$n = $n - 1 }")
            .unwrap();
        assert_eq!(
            harness.outputs(),
            vec![PsValue::I64(3), PsValue::I64(2), PsValue::I64(1)]
        );
    }

    #[test]
    fn foreach_drains_the_input_stream() {
        let harness = Harness::new(false);
        harness.input.push(PsValue::I32(1));
        harness.input.push(PsValue::I32(2));
        harness.input.set_complete(true);

        harness.run("foreach $x { out $x * 2 }").unwrap();
        assert_eq!(harness.outputs(), vec![PsValue::I64(2), PsValue::I64(4)]);
    }

    #[test]
    fn arguments_bind_positionally_and_by_name() {
        let harness = Harness::new(false);
        harness
            .run_with(
                "out $0 + 1\nout $label",
                vec![PsValue::I32(41)],
                HashMap::from([("label".to_string(), PsValue::str("named"))]),
            )
            .unwrap();
        assert_eq!(
            harness.outputs(),
            vec![PsValue::I64(42), PsValue::str("named")]
        );
    }

    #[test]
    fn undefined_variable_is_a_runtime_error() {
        let harness = Harness::new(false);
        let err = harness.run("out $missing").unwrap_err();
        match err {
            EngineError::Runtime { message, .. } => {
                assert!(message.contains("undefined variable"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn stopping_pipeline_unwinds_the_loop() {
        let harness = Harness::new(false);
        let pipeline = harness.pipeline.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            pipeline.begin_stop();
        });

        let err = harness.run("loop { out 1 }").unwrap_err();
        assert!(matches!(err, EngineError::Stopped));
        stopper.join().unwrap();
    }

    #[test]
    fn host_write_without_a_host_is_a_runtime_error() {
        let harness = Harness::new(false);
        let err = harness.run("say 'anyone there'").unwrap_err();
        match err {
            EngineError::Runtime { message, .. } => {
                assert!(message.contains("does not support"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn credential_prompt_resolves_from_the_registry() {
        let harness = Harness::new(true);
        // Pre-resolve call id 1, the first id the pool will mint.
        harness.registry.store(
            &HostResponse::builder()
                .call_id(1)
                .result(Some(
                    PsCredential::builder()
                        .username("admin".to_string())
                        .password("s3cret".to_string())
                        .build()
                        .to_ps_value(),
                ))
                .pipeline_scope(true)
                .build(),
        );

        harness.run("out credential('cap', 'msg')").unwrap();
        let outputs = harness.outputs();
        assert_eq!(outputs.len(), 1);
        let credential = PsCredential::try_from(&outputs[0]).unwrap();
        assert_eq!(credential.username, "admin");
        assert_eq!(credential.password, "s3cret");
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let harness = Harness::new(false);
        let err = harness.run("out 1 / 0").unwrap_err();
        assert!(matches!(err, EngineError::Runtime { .. }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(script: &str) -> ParseFail {
        parse(script).unwrap_err()
    }

    #[test]
    fn scripts_parse() {
        assert!(parse("out 1 + 1").is_ok());
        assert!(parse("say 'hello'\nout 2 * (3 - 1)").is_ok());
        assert!(parse("foreach $x { out $x * 2 }").is_ok());
        assert!(parse("loop { say 'x' }").is_ok());
        assert!(parse("while true { say 'x' }").is_ok());
        assert!(parse("$c = credential('cap', 'msg')\nout $c").is_ok());
        assert!(parse("# only a comment").is_ok());
        assert!(parse("").is_ok());
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let fail = parse_err("out (");
        assert!(fail.message.contains("expected an expression"));

        let fail = parse_err("say 'unterminated");
        assert!(fail.message.contains("unterminated string"));
        assert_eq!(fail.line, 1);
        assert_eq!(fail.column, 5);

        assert!(parse("foreach { out 1 }").is_err());
        assert!(parse("loop { out 1").is_err());
        assert!(parse("out 1 }").is_err());
        assert!(parse("frobnicate 1").is_err());
    }

    #[test]
    fn statement_positions_point_at_the_failure() {
        let fail = parse_err("out 1\nbad 2");
        assert_eq!(fail.line, 2);
        assert_eq!(fail.column, 1);
    }
}
