use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{CommandError, ScpiError};
use crate::scpi::commands::CommandTable;
use crate::scpi::parser::split_line;

/// Executes input lines against a [`CommandTable`] and writes the replies.
#[derive(Debug)]
pub struct Dispatcher {
    table: CommandTable,
    timeout: Duration,
}

impl Dispatcher {
    /// `timeout` bounds every single request, including the wait for the
    /// driver.
    pub fn new(table: CommandTable, timeout: Duration) -> Self {
        Self { table, timeout }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Run all requests of `line`, writing one reply line per answered query.
    ///
    /// Requests run in line order. Unknown commands are skipped. A protocol
    /// error, including a malformed header, is written to the client and ends
    /// the line; device errors and timeouts are only logged
    /// and also end the line. Only I/O errors of `writer` are returned.
    pub async fn dispatch_line<W>(&self, line: &str, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        for request in split_line(line) {
            let request = match request {
                Ok(request) => request,
                Err(err) => {
                    debug!(line, "Rejected request: {}", err);
                    write_error(writer, &err).await?;
                    break;
                }
            };
            let Some(command) = self.table.lookup(request.header) else {
                let err = CommandError::UnknownCommand(request.header.to_string());
                debug!(line, "{}", err);
                continue;
            };
            let Some(operation) = command.operation(request.query) else {
                debug!(
                    command = command.mnemonic().pattern(),
                    query = request.query,
                    "Command does not support this direction"
                );
                continue;
            };
            debug!(
                command = command.mnemonic().pattern(),
                argument = request.argument,
                "{}",
                command.description()
            );

            let argument = match (operation.decode)(request.argument) {
                Ok(argument) => argument,
                Err(err) => {
                    write_error(writer, &err).await?;
                    break;
                }
            };

            let call = (operation.handler)(Arc::clone(self.table.wavemeter()), argument);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(CommandError::DeviceTimeout {
                    command: command.mnemonic().pattern().to_string(),
                    timeout: self.timeout,
                }),
            };

            match result {
                Ok(reply) => {
                    if request.query {
                        writer.write_all(reply.encode().as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await?;
                    }
                }
                Err(CommandError::Scpi(err)) => {
                    write_error(writer, &err).await?;
                    break;
                }
                Err(err) => {
                    warn!(
                        product_id = self.table.wavemeter().product_id(),
                        command = command.mnemonic().pattern(),
                        "Dropping the rest of the request: {}",
                        err
                    );
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn write_error<W>(writer: &mut W, err: &ScpiError) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!(error = ?err, "Reporting protocol error");
    writer.write_all(format!("{err}\n").as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, SimulatedDriver};
    use crate::session::{DriverHub, Wavemeter};
    use tracing_test::traced_test;

    async fn dispatcher(driver: Arc<SimulatedDriver>) -> Dispatcher {
        let hub = Arc::new(DriverHub::new(driver));
        let wavemeter = Arc::new(Wavemeter::new(1, hub));
        wavemeter.connect().await.unwrap();
        Dispatcher::new(
            CommandTable::for_wavemeter(wavemeter),
            Duration::from_millis(500),
        )
    }

    async fn run(dispatcher: &Dispatcher, line: &str) -> String {
        let mut out = Vec::new();
        dispatcher.dispatch_line(line, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_queries_reply_in_order() {
        let dispatcher = dispatcher(Arc::new(SimulatedDriver::with_wavemeters([1]))).await;

        assert_eq!(
            run(&dispatcher, "*IDN?;MEAS:WAVE:CH? (@1,3);MEAS:TEMP?").await,
            "HIGHFINESSE,WS8,1,8.1234\n401,401.5\n23.5\n"
        );
        // Sets never reply
        assert_eq!(run(&dispatcher, "GET:CH 2;*RST;GET:CH?").await, "2\n");
        assert_eq!(run(&dispatcher, "*OPC?;*ESR?").await, "1\n0\n");

        dispatcher.table().wavemeter().disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_errors_end_the_line() {
        let dispatcher = dispatcher(Arc::new(SimulatedDriver::with_wavemeters([1]))).await;

        assert_eq!(
            run(&dispatcher, "MEAS:WAVE:CH? (@1;*OPC?").await,
            "-102,\"Invalid syntax;(@1\"\n"
        );
        assert_eq!(
            run(&dispatcher, "MEAS:WAVE:CH?;*OPC?").await,
            "-115,\"Unexpected number of parameters;\"\n"
        );
        assert_eq!(
            run(&dispatcher, "MEAS:TEMP? 3;*OPC?").await,
            "-115,\"Unexpected number of parameters;\"\n"
        );

        dispatcher.table().wavemeter().disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_header_keeps_earlier_requests() {
        let dispatcher = dispatcher(Arc::new(SimulatedDriver::with_wavemeters([1]))).await;

        assert_eq!(
            run(&dispatcher, "GET:CH 3;*OPC?;MEAS::TEMP?;*STB?").await,
            "1\n-102,\"Invalid syntax;MEAS::TEMP?\"\n"
        );
        assert_eq!(dispatcher.table().wavemeter().get_channel().await.unwrap(), 3);

        dispatcher.table().wavemeter().disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_unsupported_commands_are_skipped() {
        let dispatcher = dispatcher(Arc::new(SimulatedDriver::with_wavemeters([1]))).await;

        assert_eq!(
            run(&dispatcher, "*OPC?;FOO:BAR?;GET:CH:COUNT?").await,
            "1\n8\n"
        );
        // *IDN has no set form
        assert_eq!(run(&dispatcher, "*IDN;*STB?").await, "0\n");

        dispatcher.table().wavemeter().disconnect().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_timeout_is_logged_without_reply() {
        let driver = Arc::new(SimulatedDriver::with_wavemeters([1]));
        let hub = Arc::new(DriverHub::new(driver.clone()));
        let wavemeter = Arc::new(Wavemeter::new(1, hub));
        wavemeter.connect().await.unwrap();
        let dispatcher = Dispatcher::new(
            CommandTable::for_wavemeter(Arc::clone(&wavemeter)),
            Duration::from_millis(20),
        );

        driver.set_latency(Duration::from_millis(100));
        assert_eq!(run(&dispatcher, "MEAS:TEMP?;*OPC?").await, "");
        assert!(logs_contain("timed out"));

        driver.set_latency(Duration::ZERO);
        wavemeter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_low_signal_channel_reports_minus_one() {
        let driver = Arc::new(SimulatedDriver::with_wavemeters([1]));
        driver.set_channel_reading(1, 2, Err(DriverError::LowSignal));
        let dispatcher = dispatcher(driver.clone()).await;

        assert_eq!(
            run(&dispatcher, "MEAS:WAVE:CH? (@1:3)").await,
            "401,-1,401.5\n"
        );

        // Any other driver error drops the line without a reply
        driver.set_channel_reading(1, 2, Err(DriverError::BigSignal));
        assert_eq!(run(&dispatcher, "MEAS:WAVE:CH? (@1:3);*OPC?").await, "");

        dispatcher.table().wavemeter().disconnect().await.unwrap();
    }
}
