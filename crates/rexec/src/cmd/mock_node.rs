//! Stand-in node for trying the client without a real scripting host.
//!
//! Evaluates integer arithmetic and understands the statements the result
//! pipe sends, so `exec --pipe` works end to end on one machine.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rexec_peer::{Execution, ExecMode, LocalNode, NodeResponder};
use rexec_pipe::{FileSink, ResultSink};
use rexec_wire::Command;
use serde_json::Value;
use tracing::{debug, info};

use crate::cmd::MockNodeArgs;
use crate::exit::{io_error, peer_error, CliResult, SUCCESS};

pub async fn run(args: MockNodeArgs) -> CliResult<i32> {
    let network = args.network.to_config();
    let local = match args.id {
        Some(id) => LocalNode {
            id,
            label: args.label,
        },
        None => LocalNode::new(args.label),
    };

    let interpreter = MockInterpreter::default();
    let responder = NodeResponder::start(&network, local, move |command: &Command| {
        interpreter.run(command)
    })
    .map_err(|err| peer_error("failed to start node", err))?;
    info!(
        node = %responder.identity(),
        group = %responder.group_addr(),
        "mock node ready"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("cannot listen for ctrl-c", err))?;
            info!("interrupted");
        }
        () = expire(args.duration) => debug!("duration elapsed"),
    }

    responder.stop().await;
    Ok(SUCCESS)
}

async fn expire(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[derive(Default)]
struct MockInterpreter {
    sink: Mutex<Option<FileSink>>,
}

impl MockInterpreter {
    fn run(&self, command: &Command) -> Execution {
        let outcome = match command.mode {
            ExecMode::EvaluateStatement => {
                evaluate(&command.payload).map(|value| Execution::value(value.to_string()))
            }
            ExecMode::ExecuteStatement | ExecMode::ExecuteFile => self.run_script(&command.payload),
        };
        outcome.unwrap_or_else(Execution::failed)
    }

    fn run_script(&self, script: &str) -> Result<Execution, String> {
        let mut execution = Execution::ok();
        for statement in script.lines().flat_map(|line| line.split(';')) {
            let statement = statement.trim();
            if statement.is_empty() || statement.starts_with('#') {
                continue;
            }
            if let Some(printed) = self.run_statement(statement)? {
                execution = execution.with_output("Info", printed);
            }
        }
        Ok(execution)
    }

    /// Runs one statement; returns printed text, if any.
    fn run_statement(&self, statement: &str) -> Result<Option<String>, String> {
        const IGNORED: [&str; 4] = ["import ", "os.environ", "sys.path", "importlib."];
        if IGNORED.iter().any(|prefix| statement.starts_with(prefix)) {
            return Ok(None);
        }
        if let Some(expr) = call_args(statement, "print") {
            return evaluate(expr).map(|value| Some(value.to_string()));
        }
        if let Some(arg) = call_args(statement, ".configure") {
            let path: String = serde_json::from_str(arg)
                .map_err(|err| format!("TypeError: configure expects a path: {err}"))?;
            debug!(sink = %path, "pipe configured");
            *self.lock_sink() = Some(FileSink::open(path));
            return Ok(None);
        }
        if let Some(args) = call_args(statement, ".add") {
            let (name, value) = pipe_entry(args)?;
            let sink = self.lock_sink();
            let sink = sink
                .as_ref()
                .ok_or_else(|| "RuntimeError: result pipe not configured".to_string())?;
            sink.add(&name, value)
                .map_err(|err| format!("OSError: {err}"))?;
            return Ok(None);
        }
        evaluate(statement).map(|_| None)
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, Option<FileSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Argument text of `func(...)` when `statement` is a call to `func`.
/// A leading `.` in `func` matches a method on any module.
fn call_args<'a>(statement: &'a str, func: &str) -> Option<&'a str> {
    let rest = if func.starts_with('.') {
        statement.split_once(&format!("{func}("))?.1
    } else {
        statement.strip_prefix(func)?.strip_prefix('(')?
    };
    rest.trim_end().strip_suffix(')').map(str::trim)
}

/// Splits `"name", expr` into the entry name and its value.
fn pipe_entry(args: &str) -> Result<(String, Value), String> {
    let mut stream = serde_json::Deserializer::from_str(args).into_iter::<String>();
    let name = match stream.next() {
        Some(Ok(name)) => name,
        _ => return Err("TypeError: add expects a string name".to_string()),
    };
    let expr = args[stream.byte_offset()..]
        .trim_start()
        .strip_prefix(',')
        .map(str::trim)
        .ok_or_else(|| "TypeError: add expects a value".to_string())?;

    let value = match evaluate(expr) {
        Ok(number) => Value::from(number),
        Err(_) => serde_json::from_str(expr).unwrap_or_else(|_| Value::String(expr.to_string())),
    };
    Ok((name, value))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(i64),
    Plus,
    Minus,
    Star,
    FloorDiv,
    Percent,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        let token = match c {
            ' ' | '\t' => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '%' => Token::Percent,
            '(' => Token::Open,
            ')' => Token::Close,
            '/' if chars.next_if(|&(_, next)| next == '/').is_some() => Token::FloorDiv,
            '0'..='9' => {
                let mut end = at + 1;
                while let Some(&(next_at, next)) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                    end = next_at + 1;
                    chars.next();
                }
                let number = input[at..end]
                    .parse()
                    .map_err(|_| "OverflowError: integer literal too large".to_string())?;
                Token::Num(number)
            }
            other => return Err(format!("SyntaxError: unsupported character {other:?}")),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Integer arithmetic with Python semantics for `//` and `%`.
fn evaluate(input: &str) -> Result<i64, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("SyntaxError: unexpected trailing input".to_string());
    }
    Ok(value)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<i64, String> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = match op {
                Token::Plus => value.checked_add(rhs),
                _ => value.checked_sub(rhs),
            }
            .ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i64, String> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::FloorDiv | Token::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value.checked_mul(rhs).ok_or_else(overflow)?,
                Token::FloorDiv => floor_div(value, rhs)?,
                _ => {
                    let quotient = floor_div(value, rhs)?;
                    value - rhs * quotient
                }
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<i64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.unary()?.checked_neg().ok_or_else(overflow)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<i64, String> {
        match self.bump() {
            Some(Token::Num(number)) => Ok(number),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.bump() {
                    Some(Token::Close) => Ok(value),
                    _ => Err("SyntaxError: '(' was never closed".to_string()),
                }
            }
            Some(token) => Err(format!("SyntaxError: unexpected {token:?}")),
            None => Err("SyntaxError: unexpected end of input".to_string()),
        }
    }
}

fn floor_div(lhs: i64, rhs: i64) -> Result<i64, String> {
    if rhs == 0 {
        return Err("ZeroDivisionError: integer division or modulo by zero".to_string());
    }
    let quotient = lhs.checked_div(rhs).ok_or_else(overflow)?;
    if lhs % rhs != 0 && ((lhs < 0) != (rhs < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

fn overflow() -> String {
    "OverflowError: integer overflow".to_string()
}
