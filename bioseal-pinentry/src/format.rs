//! The Assuan pinentry wire format.

use std::io::{self, BufRead};
use zeroize::Zeroizing;

/// Administrative verbs whose arguments are accepted and otherwise ignored.
const SETTINGS: &[&str] = &[
    "SETPROMPT",
    "SETERROR",
    "SETOK",
    "SETCANCEL",
    "SETNOTOK",
    "SETTITLE",
    "SETQUALITYBAR",
    "SETQUALITYBAR_TT",
    "SETTIMEOUT",
    "SETKEYINFO",
    "SETREPEAT",
    "SETREPEATERROR",
    "SETREPEATOK",
    "SETGENPIN",
    "SETGENPIN_TT",
    "OPTION",
    "NOP",
];

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    /// `SETDESC`, with its argument exactly as sent.
    SetDescription(String),
    GetPin,
    Confirm,
    Message,
    GetInfo(String),
    Reset,
    Bye,
    /// A recognised administrative verb.
    Setting(String),
    /// Any verb this pinentry does not interpret.
    Unknown(String),
}

impl Command {
    /// Reads the next command, skipping blank lines and `#` comments.
    ///
    /// Lines are not required to be UTF-8; invalid sequences are replaced, and the
    /// command is still answered. Returns `Ok(None)` once the input is exhausted.
    pub(crate) fn read<R: BufRead>(mut input: R) -> io::Result<Option<Self>> {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break Ok(None);
            }

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(&['\r', '\n'][..]);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            break Ok(Some(match read::command_line(line) {
                Ok((_, command)) => command,
                Err(_) => Command::Unknown(line.to_owned()),
            }));
        }
    }

    fn from_parts(verb: &str, args: &str) -> Self {
        match verb {
            "SETDESC" => Command::SetDescription(args.to_owned()),
            "GETPIN" => Command::GetPin,
            "CONFIRM" => Command::Confirm,
            "MESSAGE" => Command::Message,
            "GETINFO" => Command::GetInfo(args.trim().to_owned()),
            "RESET" => Command::Reset,
            "BYE" => Command::Bye,
            v if SETTINGS.contains(&v) => Command::Setting(v.to_owned()),
            v => Command::Unknown(v.to_owned()),
        }
    }
}

mod read {
    use nom::{
        bytes::complete::take_while1,
        character::complete::char,
        combinator::{all_consuming, map, opt, rest},
        sequence::{pair, preceded},
        IResult,
    };

    use super::Command;

    fn verb(input: &str) -> IResult<&str, &str> {
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(input)
    }

    pub(super) fn command_line(input: &str) -> IResult<&str, Command> {
        map(
            all_consuming(pair(verb, opt(preceded(char(' '), rest)))),
            |(verb, args): (&str, Option<&str>)| {
                Command::from_parts(verb, args.unwrap_or("").trim_start_matches(' '))
            },
        )(input)
    }
}

/// Percent-escapes a data payload: `%`, CR and LF.
///
/// The result is sized up front, so the secret is never left behind in a
/// reallocated buffer.
pub(crate) fn escape(data: &str) -> Zeroizing<String> {
    let extra = data
        .bytes()
        .filter(|b| matches!(b, b'%' | b'\r' | b'\n'))
        .count();
    let mut escaped = Zeroizing::new(String::with_capacity(data.len() + 2 * extra));
    for c in data.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Longest payload of one data line. An Assuan line holds at most 1000 bytes,
/// counting the `D ` prefix and the line feed.
pub(crate) const MAX_DATA_LEN: usize = 1000 - 3;

/// Splits an escaped payload into data line payloads of at most [`MAX_DATA_LEN`]
/// bytes. No `%XX` escape or UTF-8 sequence is split across lines.
pub(crate) fn data_lines(escaped: &str) -> impl Iterator<Item = &str> + '_ {
    let mut rest = escaped;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }

        let mut end = rest.len().min(MAX_DATA_LEN);
        if end < rest.len() {
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            if let Some(i) = rest[..end].rfind('%') {
                if i + 3 > end {
                    end = i;
                }
            }
        }

        let (line, tail) = rest.split_at(end);
        rest = tail;
        Some(line)
    })
}

/// Decodes `%XX` escapes in a command argument. Malformed escapes are kept.
pub(crate) fn unescape(arg: &str) -> String {
    let bytes = arg.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

pub(crate) mod write {
    use cookie_factory::{combinator::string, sequence::tuple, SerializeFn, WriteContext};
    use std::io::Write;

    pub(crate) fn ok<'a, W: 'a + Write>(message: Option<&'a str>) -> impl SerializeFn<W> + 'a {
        move |w: WriteContext<W>| match message {
            Some(message) => tuple((string("OK "), string(message), string("\n")))(w),
            None => string("OK\n")(w),
        }
    }

    pub(crate) fn data<'a, W: 'a + Write>(escaped: &'a str) -> impl SerializeFn<W> + 'a {
        tuple((string("D "), string(escaped), string("\n")))
    }

    pub(crate) fn error<'a, W: 'a + Write>(
        code: u32,
        description: &'a str,
    ) -> impl SerializeFn<W> + 'a {
        move |w: WriteContext<W>| {
            let code = format!("{}", code);
            tuple((
                string("ERR "),
                string(code),
                string(" "),
                string(description),
                string("\n"),
            ))(w)
        }
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::{data_lines, escape, unescape, Command, MAX_DATA_LEN};

    fn parse(input: &str) -> Vec<Command> {
        parse_bytes(input.as_bytes())
    }

    fn parse_bytes(mut input: &[u8]) -> Vec<Command> {
        let mut commands = vec![];
        while let Some(command) = Command::read(&mut input).unwrap() {
            commands.push(command);
        }
        commands
    }

    #[test]
    fn reads_pinentry_session() {
        let commands = parse(
            "OPTION ttyname=/dev/pts/1\r\n\
             # a comment\n\
             \n\
             SETDESC Please unlock the card%0A%0ANumber: 0006\n\
             SETPROMPT PIN\n\
             GETINFO  pid\n\
             GETPIN\n\
             BYE",
        );
        assert_eq!(
            commands,
            vec![
                Command::Setting("OPTION".to_owned()),
                Command::SetDescription("Please unlock the card%0A%0ANumber: 0006".to_owned()),
                Command::Setting("SETPROMPT".to_owned()),
                Command::GetInfo("pid".to_owned()),
                Command::GetPin,
                Command::Bye,
            ]
        );
    }

    #[test]
    fn verbs_are_case_sensitive() {
        assert_eq!(parse("getpin\n"), vec![Command::Unknown("getpin".to_owned())]);
    }

    #[test]
    fn unparseable_lines_are_unknown_commands() {
        assert_eq!(
            parse("  GETPIN\nAUTH\tx\nCANCEL\n"),
            vec![
                Command::Unknown("  GETPIN".to_owned()),
                Command::Unknown("AUTH\tx".to_owned()),
                Command::Unknown("CANCEL".to_owned()),
            ]
        );
    }

    #[test]
    fn invalid_utf8_is_read_as_a_command() {
        let commands = parse_bytes(b"OPTION lc-ctype=\xe9\nSETDESC caf\xe9\nGETPIN\n");
        assert_eq!(
            commands,
            vec![
                Command::Setting("OPTION".to_owned()),
                Command::SetDescription("caf\u{FFFD}".to_owned()),
                Command::GetPin,
            ]
        );
    }

    #[test]
    fn empty_description() {
        assert_eq!(parse("SETDESC\n"), vec![Command::SetDescription(String::new())]);
    }

    #[test]
    fn escaping() {
        assert_eq!(&*escape("100%\r\nsure"), "100%25%0D%0Asure");
        assert_eq!(&*escape("plain"), "plain");
        assert_eq!(unescape("a%25b%0Ac"), "a%b\nc");
        assert_eq!(unescape("50%"), "50%");
        assert_eq!(unescape("%G0"), "%G0");
    }

    #[test]
    fn long_payloads_are_split_between_escapes() {
        let escaped = escape(&"%".repeat(400));
        let lines: Vec<_> = data_lines(&escaped).collect();
        assert_eq!(lines.iter().map(|l| l.len()).collect::<Vec<_>>(), [996, 204]);
        assert!(data_lines("").next().is_none());
        assert_eq!(data_lines("short").collect::<Vec<_>>(), ["short"]);
    }

    #[quickcheck]
    fn data_lines_cover_payload(s: String) -> bool {
        let escaped = escape(&s.repeat(40));
        let lines: Vec<_> = data_lines(&escaped).collect();
        lines.concat() == *escaped
            && lines.iter().all(|line| {
                !line.is_empty()
                    && line.len() <= MAX_DATA_LEN
                    && line.rfind('%').map_or(true, |i| i + 3 <= line.len())
            })
    }

    #[quickcheck]
    fn escape_round_trip(s: String) -> bool {
        let escaped = escape(&s);
        !escaped.contains(&['\r', '\n'][..]) && unescape(&escaped) == s
    }
}
