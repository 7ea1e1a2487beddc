#![doc = include_str!("../README.md")]

use std::sync::LazyLock;

use biometrics::Counter;
use regex::Regex;

///////////////////////////////////////////// biometrics ///////////////////////////////////////////

static OPTION_REGISTERED: Counter = Counter::new("clasp.option.registered");
static ARGUMENT_SCANNED: Counter = Counter::new("clasp.parse.argument");
static POSITIONAL: Counter = Counter::new("clasp.parse.positional");
static TERMINATOR: Counter = Counter::new("clasp.parse.terminator");
static FLAG_SET: Counter = Counter::new("clasp.bind.flag");
static VALUE_BOUND: Counter = Counter::new("clasp.bind.value");
static UNRECOGNIZED_OPTION: Counter = Counter::new("clasp.error.unrecognized_option");
static UNEXPECTED_ARGUMENT: Counter = Counter::new("clasp.error.unexpected_argument");
static MISSING_ARGUMENT: Counter = Counter::new("clasp.error.missing_argument");

/// Register all clasp counters with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&OPTION_REGISTERED);
    collector.register_counter(&ARGUMENT_SCANNED);
    collector.register_counter(&POSITIONAL);
    collector.register_counter(&TERMINATOR);
    collector.register_counter(&FLAG_SET);
    collector.register_counter(&VALUE_BOUND);
    collector.register_counter(&UNRECOGNIZED_OPTION);
    collector.register_counter(&UNEXPECTED_ARGUMENT);
    collector.register_counter(&MISSING_ARGUMENT);
}

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// A mistake on the commandline.  Each variant carries the option exactly as the user typed it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// No registered option goes by this name.
    UnrecognizedOption {
        /// The unknown option.
        option: String,
    },
    /// A flag was handed a value, e.g. `--verbose=yes`.
    UnexpectedArgument {
        /// The flag that got a value.
        option: String,
    },
    /// A string-valued option ran out of arguments.
    MissingArgument {
        /// The option missing its value.
        option: String,
    },
}

impl Error {
    /// The offending token.
    pub fn option(&self) -> &str {
        match self {
            Error::UnrecognizedOption { option } => option,
            Error::UnexpectedArgument { option } => option,
            Error::MissingArgument { option } => option,
        }
    }

    fn unrecognized_option(option: &str) -> Self {
        UNRECOGNIZED_OPTION.click();
        Error::UnrecognizedOption {
            option: option.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnrecognizedOption { option } => write!(f, "Unrecognized option: {:?}", option),
            Error::UnexpectedArgument { option } => {
                write!(f, "Option {:?} doesn't allow an argument", option)
            }
            Error::MissingArgument { option } => {
                write!(f, "Option {:?} requires an argument", option)
            }
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////// FailureHandler //////////////////////////////////////////

/// What [Parser::parse] does with the first commandline mistake it finds.
pub trait FailureHandler {
    /// Report `err`.  Must not return.
    fn fail(&mut self, err: &Error) -> !;
}

/// Print the error to stderr and exit with status 1.  This is the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitOnFailure;

impl FailureHandler for ExitOnFailure {
    fn fail(&mut self, err: &Error) -> ! {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

/// Panic with the error's message.  Useful under test, where exiting would take the harness down.
#[derive(Clone, Copy, Debug, Default)]
pub struct PanicOnFailure;

impl FailureHandler for PanicOnFailure {
    fn fail(&mut self, err: &Error) -> ! {
        panic!("{}", err);
    }
}

/////////////////////////////////////////////// names //////////////////////////////////////////////

// ASCII classes so that \w means what it does in getopt-style tools.
static SHORT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-[A-Za-z0-9_]$").expect("static regex must compile"));
static LONG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-(-[A-Za-z0-9_]+)+$").expect("static regex must compile"));

fn is_short_name(name: &str) -> bool {
    SHORT_NAME.is_match(name)
}

fn is_long_name(name: &str) -> bool {
    LONG_NAME.is_match(name)
}

//////////////////////////////////////////////// Cell //////////////////////////////////////////////

enum Slot<'a, T> {
    Borrowed(&'a mut T),
    Owned(T),
}

impl<'a, T> Slot<'a, T> {
    fn get(&self) -> &T {
        match self {
            Slot::Borrowed(t) => &**t,
            Slot::Owned(t) => t,
        }
    }

    fn set(&mut self, value: T) {
        match self {
            Slot::Borrowed(t) => **t = value,
            Slot::Owned(t) => *t = value,
        }
    }
}

enum Cell<'a> {
    Bool(Slot<'a, bool>),
    Str(Slot<'a, String>),
}

impl<'a> Cell<'a> {
    fn is_bool(&self) -> bool {
        matches!(self, Cell::Bool(_))
    }
}

/////////////////////////////////////////////// Handles ////////////////////////////////////////////

/// A boolean option whose storage the parser owns.  Read it back with [Parser::flag].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Flag(usize);

/// A string option whose storage the parser owns.  Read it back with [Parser::value].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Value(usize);

///////////////////////////////////////////// Registered ///////////////////////////////////////////

struct Registered<'a> {
    short: String,
    long: String,
    cell: Cell<'a>,
}

fn find_by_name<'b>(
    options: &'b [Registered<'_>],
    short: &str,
    long: &str,
) -> Option<(usize, &'b str)> {
    for (idx, option) in options.iter().enumerate() {
        if !short.is_empty() && option.short == short {
            return Some((idx, &option.short));
        } else if !long.is_empty() && option.long == long {
            return Some((idx, &option.long));
        }
    }
    None
}

fn bind(option: &mut Registered<'_>, token: &str, value: Option<&str>) -> Result<(), Error> {
    match (&mut option.cell, value) {
        (Cell::Bool(_), Some(_)) => {
            UNEXPECTED_ARGUMENT.click();
            Err(Error::UnexpectedArgument {
                option: token.to_string(),
            })
        }
        (Cell::Bool(flag), None) => {
            FLAG_SET.click();
            flag.set(true);
            Ok(())
        }
        (Cell::Str(_), None) => {
            MISSING_ARGUMENT.click();
            Err(Error::MissingArgument {
                option: token.to_string(),
            })
        }
        (Cell::Str(string), Some(value)) => {
            VALUE_BOUND.click();
            string.set(value.to_string());
            Ok(())
        }
    }
}

///////////////////////////////////////////// ParseState ///////////////////////////////////////////

struct ParseState<'b> {
    arguments: &'b [String],
    cursor: usize,
}

impl<'b> ParseState<'b> {
    fn new(arguments: &'b [String]) -> Self {
        Self {
            arguments,
            cursor: 0,
        }
    }

    fn current(&self) -> Option<&'b str> {
        self.arguments.get(self.cursor).map(String::as_str)
    }

    fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Consume the argument after the cursor, if there is one.
    fn take_following(&mut self) -> Option<&'b str> {
        if self.cursor + 1 < self.arguments.len() {
            self.cursor += 1;
            Some(&self.arguments[self.cursor])
        } else {
            None
        }
    }

    fn remaining(&self) -> &'b [String] {
        &self.arguments[(self.cursor + 1).min(self.arguments.len())..]
    }
}

////////////////////////////////////////////// Parser //////////////////////////////////////////////

/// A set of registered options and the arguments they will be parsed from.
///
/// Options must be registered before parsing.  Storage bound with [Parser::bool_var] and
/// [Parser::string_var] stays borrowed for as long as the parser lives; storage allocated with
/// [Parser::bool] and [Parser::string] is read back through the returned handle.
pub struct Parser<'a> {
    arguments: Vec<String>,
    options: Vec<Registered<'a>>,
    on_failure: Box<dyn FailureHandler>,
}

impl<'a> Parser<'a> {
    /// Create a parser over `arguments`, which should not include the program name.
    pub fn new<I, S>(arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            arguments: arguments.into_iter().map(Into::into).collect(),
            options: vec![],
            on_failure: Box::new(ExitOnFailure),
        }
    }

    /// Create a parser over the process' arguments.
    pub fn from_env() -> Self {
        Self::new(std::env::args().skip(1))
    }

    /// Replace what happens when [Parser::parse] hits a commandline mistake.
    pub fn with_failure_handler<F: FailureHandler + 'static>(mut self, handler: F) -> Self {
        self.on_failure = Box::new(handler);
        self
    }

    /// The number of registered options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// True iff no options are registered.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Bind `cell` to the flag `short`/`long`.  Either name may be empty, but not both.
    ///
    /// # Panics
    ///
    /// If neither name is given, either name is malformed, or either name is already registered.
    pub fn bool_var(&mut self, cell: &'a mut bool, short: &str, long: &str) {
        self.register(short, long, Cell::Bool(Slot::Borrowed(cell)));
    }

    /// Bind `cell` to the string option `short`/`long`.  Panics like [Parser::bool_var].
    pub fn string_var(&mut self, cell: &'a mut String, short: &str, long: &str) {
        self.register(short, long, Cell::Str(Slot::Borrowed(cell)));
    }

    /// Register a flag whose storage lives in the parser.  Panics like [Parser::bool_var].
    pub fn bool(&mut self, short: &str, long: &str) -> Flag {
        Flag(self.register(short, long, Cell::Bool(Slot::Owned(false))))
    }

    /// Register a string option whose storage lives in the parser.  Panics like
    /// [Parser::bool_var].
    pub fn string(&mut self, short: &str, long: &str) -> Value {
        Value(self.register(short, long, Cell::Str(Slot::Owned(String::new()))))
    }

    /// Read back a flag registered with [Parser::bool].
    ///
    /// # Panics
    ///
    /// If `flag` was issued by a different parser.
    pub fn flag(&self, flag: Flag) -> bool {
        match self.options.get(flag.0).map(|option| &option.cell) {
            Some(Cell::Bool(slot)) => *slot.get(),
            _ => panic!("flag handle {:?} was issued by another parser", flag),
        }
    }

    /// Read back a string registered with [Parser::string].
    ///
    /// # Panics
    ///
    /// If `value` was issued by a different parser.
    pub fn value(&self, value: Value) -> &str {
        match self.options.get(value.0).map(|option| &option.cell) {
            Some(Cell::Str(slot)) => slot.get(),
            _ => panic!("value handle {:?} was issued by another parser", value),
        }
    }

    /// Find the first option whose short name is `short` or whose long name is `long`.  Names are
    /// given without dashes and empty names never match.  Returns the option's registration index
    /// and the name that matched.
    pub fn find_by_name(&self, short: &str, long: &str) -> Option<(usize, &str)> {
        find_by_name(&self.options, short, long)
    }

    fn register(&mut self, short: &str, long: &str, cell: Cell<'a>) -> usize {
        if short.is_empty() && long.is_empty() {
            panic!("no option set");
        }
        if !short.is_empty() && !is_short_name(short) {
            panic!("error parsing option: {:?}", short);
        }
        if !long.is_empty() && !is_long_name(long) {
            panic!("error parsing option: {:?}", long);
        }
        let short_trimmed = short.trim_start_matches('-');
        let long_trimmed = long.trim_start_matches('-');
        if let Some((idx, _)) = self.find_by_name(short_trimmed, long_trimmed) {
            let owns_short =
                !short_trimmed.is_empty() && self.options[idx].short == short_trimmed;
            let duplicate = if owns_short {
                short
            } else {
                long
            };
            panic!("option already set: {:?}", duplicate);
        }
        OPTION_REGISTERED.click();
        self.options.push(Registered {
            short: short_trimmed.to_string(),
            long: long_trimmed.to_string(),
            cell,
        });
        self.options.len() - 1
    }

    /// Parse the arguments, binding every option encountered and returning the positional
    /// arguments in order.  On the first mistake, hand the error to the failure handler.
    pub fn parse(&mut self) -> Vec<String> {
        match self.try_parse() {
            Ok(free) => free,
            Err(err) => self.on_failure.fail(&err),
        }
    }

    /// Parse the arguments like [Parser::parse], but return the first mistake instead of
    /// consulting the failure handler.  Options bound before the mistake keep their values.
    pub fn try_parse(&mut self) -> Result<Vec<String>, Error> {
        let options = &mut self.options;
        let mut state = ParseState::new(&self.arguments);
        let mut free = vec![];
        while let Some(arg) = state.current() {
            ARGUMENT_SCANNED.click();
            if arg == "--" {
                TERMINATOR.click();
                free.extend(state.remaining().iter().cloned());
                break;
            } else if let Some(body) = arg.strip_prefix("--") {
                let (name, inline) = match body.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (body, None),
                };
                let token = &arg[..name.len() + 2];
                let idx = match find_by_name(options, "", name) {
                    Some((idx, _)) => idx,
                    None => {
                        return Err(Error::unrecognized_option(token));
                    }
                };
                let value = match inline {
                    Some(value) => Some(value),
                    None if !options[idx].cell.is_bool() => state.take_following(),
                    None => None,
                };
                bind(&mut options[idx], token, value)?;
            } else if let Some(cluster) = arg.strip_prefix('-') {
                for (offset, c) in cluster.char_indices() {
                    let end = offset + c.len_utf8();
                    let name = &cluster[offset..end];
                    let idx = match find_by_name(options, name, "") {
                        Some((idx, _)) => idx,
                        None => {
                            return Err(Error::unrecognized_option(name));
                        }
                    };
                    if options[idx].cell.is_bool() {
                        bind(&mut options[idx], name, None)?;
                        continue;
                    }
                    let value = if end < cluster.len() {
                        Some(&cluster[end..])
                    } else {
                        state.take_following()
                    };
                    bind(&mut options[idx], name, value)?;
                    break;
                }
            } else {
                POSITIONAL.click();
                free.push(arg.to_string());
            }
            state.advance();
        }
        Ok(free)
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names() {
        assert!(is_short_name("-x"));
        assert!(is_short_name("-X"));
        assert!(is_short_name("-7"));
        assert!(is_short_name("-_"));
        assert!(!is_short_name(""));
        assert!(!is_short_name("-"));
        assert!(!is_short_name("x"));
        assert!(!is_short_name("--"));
        assert!(!is_short_name("-xy"));
        assert!(!is_short_name("--x"));
        assert!(!is_short_name("-é"));
    }

    #[test]
    fn long_names() {
        assert!(is_long_name("--x"));
        assert!(is_long_name("--xxx"));
        assert!(is_long_name("--x-y"));
        assert!(is_long_name("--dry_run"));
        assert!(is_long_name("--a-b-c"));
        assert!(!is_long_name(""));
        assert!(!is_long_name("-"));
        assert!(!is_long_name("--"));
        assert!(!is_long_name("-x"));
        assert!(!is_long_name("xxx"));
        assert!(!is_long_name("---x"));
        assert!(!is_long_name("--x-"));
        assert!(!is_long_name("--x--y"));
        assert!(!is_long_name("--x=y"));
    }

    #[test]
    fn slot_set_through_borrow() {
        let mut s = String::from("before");
        {
            let mut slot = Slot::Borrowed(&mut s);
            slot.set("after".to_string());
            assert_eq!("after", slot.get());
        }
        assert_eq!("after", s);
    }

    #[test]
    fn bind_flag_rejects_value() {
        let mut option = Registered {
            short: "x".to_string(),
            long: String::new(),
            cell: Cell::Bool(Slot::Owned(false)),
        };
        assert_eq!(
            Err(Error::UnexpectedArgument {
                option: "x".to_string()
            }),
            bind(&mut option, "x", Some(""))
        );
        assert_eq!(Ok(()), bind(&mut option, "x", None));
        assert!(matches!(option.cell, Cell::Bool(Slot::Owned(true))));
    }

    #[test]
    fn bind_string_requires_value() {
        let mut option = Registered {
            short: String::new(),
            long: "msg".to_string(),
            cell: Cell::Str(Slot::Owned(String::new())),
        };
        assert_eq!(
            Err(Error::MissingArgument {
                option: "--msg".to_string()
            }),
            bind(&mut option, "--msg", None)
        );
        assert_eq!(Ok(()), bind(&mut option, "--msg", Some("")));
        assert_eq!(Ok(()), bind(&mut option, "--msg", Some("hi")));
        match &option.cell {
            Cell::Str(slot) => assert_eq!("hi", slot.get()),
            Cell::Bool(_) => panic!("expected a string cell"),
        }
    }

    #[test]
    fn parse_state_cursor() {
        let arguments = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut state = ParseState::new(&arguments);
        assert_eq!(Some("a"), state.current());
        assert_eq!(Some("b"), state.take_following());
        assert_eq!(&arguments[2..], state.remaining());
        state.advance();
        assert_eq!(Some("c"), state.current());
        assert_eq!(None, state.take_following());
        assert!(state.remaining().is_empty());
        state.advance();
        assert_eq!(None, state.current());
    }

    #[test]
    fn find_by_name_prefers_short_per_option() {
        let mut parser = Parser::new(Vec::<String>::new());
        parser.bool("", "--x");
        parser.bool("-x", "--other");
        assert_eq!(Some((0, "x")), parser.find_by_name("x", "x"));
        assert_eq!(Some((1, "x")), parser.find_by_name("x", ""));
        assert_eq!(Some((0, "x")), parser.find_by_name("", "x"));
        assert_eq!(None, parser.find_by_name("", ""));
        assert_eq!(None, parser.find_by_name("q", "quiet"));
    }

    #[test]
    fn counters_click() {
        use biometrics::Sensor;
        let collector = biometrics::Collector::new();
        register_biometrics(&collector);
        let registered = OPTION_REGISTERED.read();
        let flags = FLAG_SET.read();
        let values = VALUE_BOUND.read();
        let positionals = POSITIONAL.read();
        let missing = MISSING_ARGUMENT.read();
        let mut parser = Parser::new(["-x", "-m", "hi", "free"]);
        let x = parser.bool("-x", "");
        let m = parser.string("-m", "");
        assert_eq!(vec!["free".to_string()], parser.parse());
        assert!(parser.flag(x));
        assert_eq!("hi", parser.value(m));
        let mut parser = Parser::new(["-m"]);
        parser.string("-m", "");
        assert!(parser.try_parse().is_err());
        // Other tests click the same statics concurrently, so only lower bounds hold.
        assert!(OPTION_REGISTERED.read() >= registered + 3);
        assert!(FLAG_SET.read() >= flags + 1);
        assert!(VALUE_BOUND.read() >= values + 1);
        assert!(POSITIONAL.read() >= positionals + 1);
        assert!(MISSING_ARGUMENT.read() >= missing + 1);
    }

    #[test]
    fn error_display() {
        assert_eq!(
            r#"Unrecognized option: "--unknown""#,
            Error::UnrecognizedOption {
                option: "--unknown".to_string()
            }
            .to_string()
        );
        assert_eq!(
            r#"Option "x" doesn't allow an argument"#,
            Error::UnexpectedArgument {
                option: "x".to_string()
            }
            .to_string()
        );
        assert_eq!(
            r#"Option "--msg" requires an argument"#,
            Error::MissingArgument {
                option: "--msg".to_string()
            }
            .to_string()
        );
    }
}
