//! Mock debugger REPL for integration testing
//!
//! Behaves enough like a line-oriented debugger console to exercise every
//! transport without a real debugger installed:
//!
//! ```text
//! mock_repl PROGRAM                         debug locally
//! mock_repl -O --sock-path=PATH PROGRAM     serve over a unix domain socket
//! mock_repl -O --port=PORT PROGRAM          serve over TCP/IP (0 picks a port)
//! mock_repl -A PATH|PORT                    attach to a serving instance
//! ```
//!
//! Programs are tiny: `name = expr`, `puts expr`, `raise message`, with
//! integer and string literals joined by `+`.

use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{TcpListener, TcpStream};

const LOCAL_PROMPT: &str = "(mock)";
const REMOTE_PROMPT: &str = "(mock:remote)";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mock_repl: {}", e);
            2
        }
    };
    std::process::exit(code);
}

fn run(args: &[String]) -> io::Result<i32> {
    match args.first().map(String::as_str) {
        Some("-A") => {
            let target = args.get(1).ok_or_else(|| usage("-A needs a target"))?;
            attach(target)
        }
        Some("-O") => {
            let mut sock_path = None;
            let mut port = None;
            let mut program = None;
            for arg in &args[1..] {
                if let Some(path) = arg.strip_prefix("--sock-path=") {
                    sock_path = Some(path.to_string());
                } else if let Some(p) = arg.strip_prefix("--port=") {
                    port = Some(p.parse::<u16>().map_err(|_| usage("bad port"))?);
                } else {
                    program = Some(arg.clone());
                }
            }
            let program = Program::load(&program.ok_or_else(|| usage("missing program"))?)?;
            let (input, output) = match (sock_path, port) {
                (Some(path), _) => listen_unix(&path)?,
                (None, Some(port)) => listen_tcp(port)?,
                (None, None) => return Err(usage("-O needs --sock-path or --port")),
            };
            Repl::new(program, input, output, REMOTE_PROMPT).run()
        }
        Some(path) => {
            let program = Program::load(path)?;
            let input = Box::new(BufReader::new(io::stdin()));
            let output = Box::new(BufWriter::new(terminal()?));
            Repl::new(program, input, output, LOCAL_PROMPT).run()
        }
        None => Err(usage("missing program")),
    }
}

fn usage(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

type Input = Box<dyn BufRead + Send>;
type Output = Box<dyn Write + Send>;

/// Unbuffered stdout, so a flushed prompt reaches the terminal in one write
#[cfg(unix)]
fn terminal() -> io::Result<Box<dyn Write + Send>> {
    use std::os::fd::AsFd;

    let fd = io::stdout().as_fd().try_clone_to_owned()?;
    Ok(Box::new(std::fs::File::from(fd)))
}

#[cfg(not(unix))]
fn terminal() -> io::Result<Box<dyn Write + Send>> {
    Ok(Box::new(io::stdout()))
}

#[cfg(unix)]
fn listen_unix(path: &str) -> io::Result<(Input, Output)> {
    use interprocess::local_socket::{prelude::*, GenericFilePath, ListenerOptions};

    let _ = std::fs::remove_file(path);
    let name = path.to_fs_name::<GenericFilePath>()?;
    let listener = ListenerOptions::new().name(name).create_sync()?;
    announce(&format!("Debugger can attach via UNIX domain socket ({})", path))?;

    let stream = listener.accept()?;
    let (recv, send) = stream.split();
    Ok((Box::new(BufReader::new(recv)), Box::new(BufWriter::new(send))))
}

#[cfg(not(unix))]
fn listen_unix(_path: &str) -> io::Result<(Input, Output)> {
    Err(usage("unix domain sockets are not supported here"))
}

fn listen_tcp(port: u16) -> io::Result<(Input, Output)> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    let addr = listener.local_addr()?;
    announce(&format!("Debugger can attach via TCP/IP ({})", addr))?;

    let (stream, _) = listener.accept()?;
    let reader = stream.try_clone()?;
    Ok((Box::new(BufReader::new(reader)), Box::new(BufWriter::new(stream))))
}

fn announce(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}

/// Relay the terminal to a serving instance until it hangs up
fn attach(target: &str) -> io::Result<i32> {
    let (mut reader, mut writer): (Box<dyn Read + Send>, Box<dyn Write + Send>) =
        match target.parse::<u16>() {
            Ok(port) => {
                let stream = TcpStream::connect(("127.0.0.1", port))?;
                (Box::new(stream.try_clone()?), Box::new(stream))
            }
            Err(_) => connect_unix(target)?,
        };

    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let _ = io::copy(&mut stdin, &mut writer);
    });

    let mut stdout = terminal()?;
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        stdout.write_all(&buf[..n])?;
        stdout.flush()?;
    }
    Ok(0)
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
    use interprocess::local_socket::{prelude::*, GenericFilePath, Stream};

    let name = path.to_fs_name::<GenericFilePath>()?;
    let stream = Stream::connect(name)?;
    let (recv, send) = stream.split();
    Ok((Box::new(recv), Box::new(send)))
}

#[cfg(not(unix))]
fn connect_unix(_path: &str) -> io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
    Err(usage("unix domain sockets are not supported here"))
}

#[derive(Clone, Debug)]
enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn inspect(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => format!("{:?}", s),
        }
    }

    fn display(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Value::Int(n) => json!(n),
            Value::Str(s) => json!(s),
        }
    }
}

struct Program {
    path: String,
    lines: Vec<String>,
}

impl Program {
    fn load(path: &str) -> io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self {
            path: path.to_string(),
            lines: source.lines().map(str::to_string).collect(),
        })
    }
}

enum Stop {
    Paused,
    Finished,
    Raised(String),
}

struct Repl {
    program: Program,
    input: Input,
    output: Output,
    prompt: &'static str,
    markers: bool,
    /// 1-based line about to run
    line: usize,
    locals: BTreeMap<String, Value>,
    breakpoints: BTreeSet<usize>,
}

impl Repl {
    fn new(program: Program, input: Input, output: Output, prompt: &'static str) -> Self {
        let markers = std::env::var("CONSOLE_TEST_UI").is_ok_and(|v| v == "terminal");
        Self {
            program,
            input,
            output,
            prompt,
            markers,
            line: 1,
            locals: BTreeMap::new(),
            breakpoints: BTreeSet::new(),
        }
    }

    fn is_remote(&self) -> bool {
        self.prompt == REMOTE_PROMPT
    }

    fn run(mut self) -> io::Result<i32> {
        if self.skip_blank() {
            return Ok(0);
        }
        self.show_frame()?;

        loop {
            self.show_prompt()?;
            let Some(line) = self.read_line()? else {
                return Ok(0);
            };
            let line = line.trim();
            let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
            let arg = arg.trim();

            match cmd {
                "" => {}
                "p" | "pp" => match self.eval(arg) {
                    Ok(value) => self.say(&format!("=> {}", value.inspect()))?,
                    Err(e) => self.say(&e)?,
                },
                "info" => {
                    let listing: Vec<String> = self
                        .locals
                        .iter()
                        .map(|(name, value)| format!("{} = {}", name, value.inspect()))
                        .collect();
                    for entry in listing {
                        self.say(&entry)?;
                    }
                }
                "b" | "break" => match arg.parse::<usize>() {
                    Ok(line) if (1..=self.program.lines.len()).contains(&line) => {
                        self.breakpoints.insert(line);
                        let id = self.breakpoints.len();
                        let location = format!("{}:{}", self.program.path, line);
                        self.say(&format!("#{}  BP - Line  {} (line)", id, location))?;
                    }
                    _ => self.repl_error(&format!("invalid breakpoint: {}", arg))?,
                },
                "n" | "next" | "s" | "step" => {
                    if let Some(code) = self.resume(false)? {
                        return Ok(code);
                    }
                }
                "c" | "continue" => {
                    if let Some(code) = self.resume(true)? {
                        return Ok(code);
                    }
                }
                "q" | "quit" => {
                    if self.confirm("Really quit?")? {
                        return Ok(0);
                    }
                }
                "kill" => {
                    if self.confirm("Really kill?")? {
                        return Ok(1);
                    }
                }
                "q!" | "quit!" | "kill!" => return Ok(0),
                other => self.repl_error(&format!("unknown command: {}", other))?,
            }
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn say(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.output, "{}", line)?;
        self.output.flush()
    }

    /// Report a failed command and finish the prompt line right away
    fn repl_error(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.output, "REPL ERROR: {}", message)?;
        writeln!(self.output, "{}", self.prompt)?;
        self.output.flush()
    }

    fn show_prompt(&mut self) -> io::Result<()> {
        if self.markers {
            let locals: Map<String, Json> = self
                .locals
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            let info = json!({
                "location": format!("{}:{}", self.program.path, self.line),
                "line": self.line,
                "locals": locals,
            });
            writeln!(self.output, "INTERNAL_INFO: {}", info)?;
        }
        write!(self.output, "{} ", self.prompt)?;
        self.output.flush()
    }

    fn show_frame(&mut self) -> io::Result<()> {
        let code = self.program.lines[self.line - 1].clone();
        let frame = format!("=>{:4}| {}", self.line, code);
        self.say(&frame)
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        write!(self.output, "{} [Y/n] ", question)?;
        self.output.flush()?;
        let answer = self.read_line()?.unwrap_or_default();
        writeln!(self.output)?;
        self.output.flush()?;
        Ok(!answer.trim().to_lowercase().starts_with('n'))
    }

    /// Run one line, or until a breakpoint when `until_break` is set
    fn resume(&mut self, until_break: bool) -> io::Result<Option<i32>> {
        loop {
            match self.exec_current()? {
                Stop::Finished => return Ok(Some(0)),
                Stop::Raised(message) => {
                    let report = format!("DEBUGGEE Exception: {} (RuntimeError)", message);
                    if self.is_remote() {
                        announce(&report)?;
                    }
                    self.say(&report)?;
                    return Ok(Some(1));
                }
                Stop::Paused => {}
            }
            if !until_break || self.breakpoints.contains(&self.line) {
                break;
            }
        }
        self.show_frame()?;
        Ok(None)
    }

    fn exec_current(&mut self) -> io::Result<Stop> {
        let code = self.program.lines[self.line - 1].trim().to_string();

        if let Some(expr) = code.strip_prefix("puts ") {
            let text = match self.eval(expr) {
                Ok(value) => value.display(),
                Err(e) => return Ok(Stop::Raised(e)),
            };
            // Program output goes to the debuggee's own terminal
            announce(&text)?;
        } else if let Some(message) = code.strip_prefix("raise ") {
            let message = match self.eval(message) {
                Ok(value) => value.display(),
                Err(_) => message.to_string(),
            };
            return Ok(Stop::Raised(message));
        } else if let Some((name, expr)) = code.split_once('=') {
            let value = match self.eval(expr) {
                Ok(value) => value,
                Err(e) => return Ok(Stop::Raised(e)),
            };
            self.locals.insert(name.trim().to_string(), value);
        }

        self.line += 1;
        if self.skip_blank() {
            return Ok(Stop::Finished);
        }
        Ok(Stop::Paused)
    }

    /// Move past blank lines; true when the program has ended
    fn skip_blank(&mut self) -> bool {
        while self.line <= self.program.lines.len()
            && self.program.lines[self.line - 1].trim().is_empty()
        {
            self.line += 1;
        }
        self.line > self.program.lines.len()
    }

    fn eval(&self, expr: &str) -> Result<Value, String> {
        let mut result: Option<Value> = None;
        for term in expr.split('+') {
            let value = self.term(term.trim())?;
            result = Some(match (result, value) {
                (None, v) => v,
                (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a + b),
                (Some(a), b) => Value::Str(a.display() + &b.display()),
            });
        }
        result.ok_or_else(|| "SyntaxError: empty expression".to_string())
    }

    fn term(&self, term: &str) -> Result<Value, String> {
        if let Ok(n) = term.parse::<i64>() {
            return Ok(Value::Int(n));
        }
        for quote in ['"', '\''] {
            if term.len() >= 2 && term.starts_with(quote) && term.ends_with(quote) {
                return Ok(Value::Str(term[1..term.len() - 1].to_string()));
            }
        }
        self.locals.get(term).cloned().ok_or_else(|| {
            format!("eval error: undefined local variable or method `{}'", term)
        })
    }
}
