//! Line-oriented question loop for the command-line front end.

use std::io::{self, BufRead, Write};

use crate::{driver::Driver, exchange::Transport};

pub const PROMPT: &str = "Enter analysis question (or type 'exit' or 'quit'):\n> ";
pub const EMPTY_QUERY: &str = "Please enter a non-empty query.";
pub const GOODBYE: &str = "Exiting analysis mode. Goodbye!";

const RULE_WIDTH: usize = 50;

/// Writes `text` framed under a heading.
pub fn write_response<W: Write>(output: &mut W, heading: &str, text: &str) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(output, "\n{rule}")?;
    writeln!(output, "{heading:^width$}", width = RULE_WIDTH)?;
    writeln!(output, "{rule}")?;
    writeln!(output, "{text}")?;
    writeln!(output, "{rule}")
}

fn is_exit(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

/// Reads questions from `input` until `exit`, `quit` or end of input, printing each answer.
///
/// A failed exchange is reported and the loop continues with the history unchanged.
pub fn run<T, R, W>(driver: &mut Driver<T>, input: R, mut output: W) -> io::Result<()>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    let mut lines = input.lines();

    loop {
        writeln!(output, "{}", "-".repeat(70))?;
        write!(output, "{PROMPT}")?;
        output.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            break;
        };

        if is_exit(&line) {
            break;
        }

        let question = line.trim();
        if question.is_empty() {
            writeln!(output, "{EMPTY_QUERY}")?;
            continue;
        }

        match driver.ask(question) {
            Ok(answer) => write_response(&mut output, "A N A L Y S I S", &answer)?,
            Err(err) => writeln!(output, "Error: {err}. Please try again.")?,
        }
    }

    writeln!(output, "{GOODBYE}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{EMPTY_QUERY, GOODBYE, run};
    use crate::{
        Api, conversation::Conversation, corpus::CorpusBlob, driver::Driver,
        exchange::testing::Scripted, retry::RetryPolicy,
    };

    fn start(transport: &Scripted) -> Driver<&Scripted> {
        let mut conversation = Conversation::new();
        conversation.seed("Use only this dataset.", &CorpusBlob::from("[]"));
        let policy = RetryPolicy::default().base_delay(Duration::from_millis(1));

        Driver::start(Api::new("k"), conversation, transport, policy)
            .unwrap()
            .0
    }

    fn session<'a>(transport: &'a Scripted, input: &str) -> (Driver<&'a Scripted>, String) {
        let mut driver = start(transport);
        let mut output = Vec::new();
        run(&mut driver, input.as_bytes(), &mut output).unwrap();
        (driver, String::from_utf8(output).unwrap())
    }

    #[test]
    fn exit_words_terminate() {
        for word in ["exit", "QUIT", "  Exit  "] {
            let transport = Scripted::new().answer("ack");
            let (driver, output) = session(&transport, &format!("{word}\nnever asked\n"));

            assert_eq!(transport.calls(), 1);
            assert_eq!(driver.conversation().len(), 2);
            assert!(output.ends_with(&format!("{GOODBYE}\n")));
        }
    }

    #[test]
    fn blank_input_reprompts_without_exchange() {
        let transport = Scripted::new().answer("ack");
        let (_, output) = session(&transport, "\n   \n");

        assert_eq!(transport.calls(), 1);
        assert_eq!(output.matches(EMPTY_QUERY).count(), 2);
        assert!(output.ends_with(&format!("{GOODBYE}\n")));
    }

    #[test]
    fn answers_are_printed() {
        let transport = Scripted::new().answer("ack").answer("There are none.");
        let (driver, output) = session(&transport, "How many documents?\nexit\n");

        assert!(output.contains("There are none."));
        assert_eq!(driver.conversation().len(), 4);
    }

    #[test]
    fn failures_are_reported_and_the_loop_continues() {
        let transport = Scripted::new()
            .answer("ack")
            .reply(400, "payload too large")
            .answer("Recovered.");
        let (driver, output) = session(&transport, "first\nsecond\n");

        assert!(output.contains("Error: API rejected the request (400)"));
        assert!(output.contains("Recovered."));
        assert_eq!(driver.conversation().len(), 4);
    }
}
