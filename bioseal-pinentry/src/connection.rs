//! Connection handler.

use cookie_factory::{GenError, SerializeFn};
use std::io::{self, BufRead, Write};

use crate::{
    format::{data_lines, write, Command},
    ErrorCode,
};

/// The line-oriented channel to gpg-agent.
pub struct Connection<R, W> {
    input: R,
    output: W,
}

impl Connection<io::StdinLock<'static>, io::StdoutLock<'static>> {
    /// A connection over this process's standard input and output.
    pub fn stdio() -> Self {
        Connection::new(io::stdin().lock(), io::stdout().lock())
    }
}

impl<R: BufRead, W: Write> Connection<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Connection { input, output }
    }

    pub(crate) fn read_command(&mut self) -> io::Result<Option<Command>> {
        Command::read(&mut self.input)
    }

    fn write_reply<'a, F: SerializeFn<&'a mut W>>(&'a mut self, f: F) -> io::Result<()> {
        cookie_factory::gen_simple(f, &mut self.output)
            .map_err(|e| match e {
                GenError::IoError(e) => e,
                e => io::Error::new(
                    io::ErrorKind::Other,
                    format!("failed to write response: {:?}", e),
                ),
            })?
            .flush()
    }

    pub(crate) fn greeting(&mut self) -> io::Result<()> {
        self.write_reply(write::ok(Some("Pleased to meet you")))
    }

    pub(crate) fn ok(&mut self) -> io::Result<()> {
        self.write_reply(write::ok(None))
    }

    pub(crate) fn closing(&mut self) -> io::Result<()> {
        self.write_reply(write::ok(Some("closing connection")))
    }

    /// Sends an already-escaped payload over as many data lines as it needs.
    pub(crate) fn data(&mut self, escaped: &str) -> io::Result<()> {
        for line in data_lines(escaped) {
            self.write_reply(write::data(line))?;
        }
        Ok(())
    }

    pub(crate) fn error(&mut self, code: ErrorCode) -> io::Result<()> {
        self.write_reply(write::error(code.code(), code.description()))
    }
}

#[cfg(test)]
mod tests {
    use super::Connection;
    use crate::ErrorCode;

    #[test]
    fn replies_are_newline_terminated() {
        let mut output = vec![];
        {
            let mut conn = Connection::new(&b""[..], &mut output);
            conn.greeting().unwrap();
            conn.data("s3cr%25t").unwrap();
            conn.ok().unwrap();
            conn.error(ErrorCode::Cancelled).unwrap();
            conn.closing().unwrap();
        }
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "OK Pleased to meet you\n\
             D s3cr%25t\n\
             OK\n\
             ERR 83886179 Operation cancelled\n\
             OK closing connection\n"
        );
    }
}
