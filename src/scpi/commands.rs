//! Command schema and per-connection command tables.
//!
//! The schema is a fixed list of [`Command`]s whose handlers are plain
//! functions taking the session they act on. A [`CommandTable`] binds the
//! schema to one [`Wavemeter`].

use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};

use crate::channel_list::parse_channel_list;
use crate::driver::{CalibrationPhase, DriverError};
use crate::error::{CommandError, ScpiError, SessionError};
use crate::measurement::Reading;
use crate::scpi::encode::Reply;
use crate::scpi::mnemonic::Mnemonic;
use crate::session::Wavemeter;

/// Decoded request argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    None,
    Text(String),
    Channels(Vec<u32>),
    Integer(i64),
    Bool(bool),
}

/// Turns the raw argument text into an [`Argument`].
pub type Decoder = fn(Option<&str>) -> Result<Argument, ScpiError>;

/// Result of running a handler.
pub type HandlerFuture = BoxFuture<'static, Result<Reply, CommandError>>;

/// Executes one direction of a command against a session.
pub type Handler = fn(Arc<Wavemeter>, Argument) -> HandlerFuture;

/// Decoder and handler of one direction (query or set).
#[derive(Clone, Copy)]
pub struct Operation {
    pub decode: Decoder,
    pub handler: Handler,
}

/// One entry of the command schema.
#[derive(Clone)]
pub struct Command {
    mnemonic: Mnemonic,
    description: &'static str,
    query: Option<Operation>,
    set: Option<Operation>,
}

impl Command {
    pub fn new(pattern: &str, description: &'static str) -> Self {
        Self {
            mnemonic: Mnemonic::new(pattern),
            description,
            query: None,
            set: None,
        }
    }

    pub fn on_query(mut self, decode: Decoder, handler: Handler) -> Self {
        self.query = Some(Operation { decode, handler });
        self
    }

    pub fn on_set(mut self, decode: Decoder, handler: Handler) -> Self {
        self.set = Some(Operation { decode, handler });
        self
    }

    pub fn mnemonic(&self) -> &Mnemonic {
        &self.mnemonic
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    /// The query or set operation, if the command supports it.
    pub fn operation(&self, query: bool) -> Option<&Operation> {
        if query {
            self.query.as_ref()
        } else {
            self.set.as_ref()
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("mnemonic", &self.mnemonic.pattern())
            .field("query", &self.query.is_some())
            .field("set", &self.set.is_some())
            .finish()
    }
}

/// Builder for a [`CommandTable`].
#[derive(Debug, Default)]
pub struct CommandTableBuilder {
    commands: Vec<Command>,
}

impl CommandTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn commands(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn build(self, wavemeter: Arc<Wavemeter>) -> CommandTable {
        CommandTable {
            wavemeter,
            commands: self.commands,
        }
    }
}

/// Command schema bound to a wavemeter session.
#[derive(Debug)]
pub struct CommandTable {
    wavemeter: Arc<Wavemeter>,
    commands: Vec<Command>,
}

impl CommandTable {
    pub fn builder() -> CommandTableBuilder {
        CommandTableBuilder::new()
    }

    /// The mandatory IEEE 488.2 commands plus the wavemeter commands.
    pub fn for_wavemeter(wavemeter: Arc<Wavemeter>) -> Self {
        Self::builder()
            .commands(mandatory_commands())
            .commands(wavemeter_commands())
            .build(wavemeter)
    }

    pub fn wavemeter(&self) -> &Arc<Wavemeter> {
        &self.wavemeter
    }

    /// Find the command named by `header`.
    pub fn lookup(&self, header: &str) -> Option<&Command> {
        self.commands
            .iter()
            .find(|command| command.mnemonic.matches(header))
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}

/// IEEE 488.2 common commands. Status registers are not modelled.
pub fn mandatory_commands() -> Vec<Command> {
    vec![
        Command::new("*CLS", "Clear Status Command").on_set(decode_any, acknowledge),
        Command::new("*ESE", "Standard Event Status Enable Command")
            .on_query(decode_none, zero)
            .on_set(decode_any, acknowledge),
        Command::new("*ESR", "Standard Event Status Register Query").on_query(decode_none, zero),
        Command::new("*IDN", "Identification Query").on_query(decode_none, identification),
        Command::new("*OPC", "Operation Complete Command")
            .on_query(decode_none, one)
            .on_set(decode_any, acknowledge),
        Command::new("*RST", "Reset Command").on_set(decode_any, acknowledge),
        Command::new("*SRE", "Service Request Enable Command")
            .on_query(decode_none, zero)
            .on_set(decode_any, acknowledge),
        Command::new("*STB", "Read Status Byte Query").on_query(decode_none, zero),
        Command::new("*TST", "Self-Test Query").on_query(decode_none, zero),
        Command::new("*WAI", "Wait-to-Continue Command").on_set(decode_any, acknowledge),
    ]
}

/// Device-specific commands.
pub fn wavemeter_commands() -> Vec<Command> {
    vec![
        Command::new("MEASure:WAVElength:CHannel", "Wavelength measurement query")
            .on_query(decode_channels, measure_wavelength),
        Command::new("MEASure:FREQuency:CHannel", "Frequency measurement query")
            .on_query(decode_channels, measure_frequency),
        Command::new("MEASure:TEMPerature", "Temperature query")
            .on_query(decode_none, measure_temperature),
        Command::new("GET:CHannel", "Active switcher channel")
            .on_query(decode_none, get_channel)
            .on_set(decode_integer, set_channel),
        Command::new("GET:CHannel:COUNT", "Number of switcher channels")
            .on_query(decode_none, get_channel_count),
        Command::new("GET:SWITch", "Switcher mode")
            .on_query(decode_none, get_switch_mode)
            .on_set(decode_bool, set_switch_mode),
        Command::new("GET:CALibration", "Reference wavelength after the last calibration")
            .on_query(decode_none, calibration_after),
        Command::new("GET:CAL:TEST", "Reference wavelength before the last calibration")
            .on_query(decode_none, calibration_before),
        Command::new("GET:CAL:DIF", "Calibration drift")
            .on_query(decode_none, calibration_difference),
    ]
}

// Decoders

/// Accepts no argument.
pub fn decode_none(argument: Option<&str>) -> Result<Argument, ScpiError> {
    match argument {
        None => Ok(Argument::None),
        Some(text) => Err(ScpiError::UnexpectedParameterCount(text.to_string())),
    }
}

/// Accepts and keeps any argument.
pub fn decode_any(argument: Option<&str>) -> Result<Argument, ScpiError> {
    Ok(argument.map_or(Argument::None, |text| Argument::Text(text.to_string())))
}

/// A channel list, or a single channel number.
pub fn decode_channels(argument: Option<&str>) -> Result<Argument, ScpiError> {
    let text = argument.ok_or_else(|| ScpiError::UnexpectedParameterCount(String::new()))?;
    if text.starts_with('(') {
        return Ok(Argument::Channels(parse_channel_list(text)?));
    }
    text.parse::<u32>()
        .map(|channel| Argument::Channels(vec![channel]))
        .map_err(|_| ScpiError::InvalidSyntax(text.to_string()))
}

pub fn decode_integer(argument: Option<&str>) -> Result<Argument, ScpiError> {
    let text = argument.ok_or_else(|| ScpiError::UnexpectedParameterCount(String::new()))?;
    text.parse::<i64>()
        .map(Argument::Integer)
        .map_err(|_| ScpiError::InvalidSyntax(text.to_string()))
}

/// `0`, `1`, `OFF` or `ON`.
pub fn decode_bool(argument: Option<&str>) -> Result<Argument, ScpiError> {
    let text = argument.ok_or_else(|| ScpiError::UnexpectedParameterCount(String::new()))?;
    match text.to_ascii_uppercase().as_str() {
        "0" | "OFF" => Ok(Argument::Bool(false)),
        "1" | "ON" => Ok(Argument::Bool(true)),
        _ => Err(ScpiError::InvalidSyntax(text.to_string())),
    }
}

// Handlers

fn ready(reply: Reply) -> HandlerFuture {
    future::ready(Ok(reply)).boxed()
}

fn acknowledge(_: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    ready(Reply::Empty)
}

fn zero(_: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    ready(Reply::Integer(0))
}

fn one(_: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    ready(Reply::Integer(1))
}

/// The decoder produced an argument the handler cannot use.
fn unexpected() -> CommandError {
    ScpiError::UnexpectedParameterCount(String::new()).into()
}

fn identification(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move {
        let info = wavemeter.get_wavemeter_info().await?;
        Ok(Reply::identification(&info))
    }
    .boxed()
}

/// Channels are queried one after another; a low signal on a channel is
/// reported as `-1` for that channel.
fn channel_reply(result: Result<Reading, SessionError>) -> Result<Reply, CommandError> {
    match result {
        Ok(reading) => Ok(Reply::Number(reading)),
        Err(SessionError::Driver(DriverError::LowSignal)) => Ok(Reply::Integer(-1)),
        Err(err) => Err(err.into()),
    }
}

fn measure_wavelength(wavemeter: Arc<Wavemeter>, argument: Argument) -> HandlerFuture {
    async move {
        let Argument::Channels(channels) = argument else {
            return Err(unexpected());
        };
        let mut replies = Vec::with_capacity(channels.len());
        for channel in channels {
            replies.push(channel_reply(wavemeter.get_wavelength(channel).await)?);
        }
        Ok(Reply::List(replies))
    }
    .boxed()
}

fn measure_frequency(wavemeter: Arc<Wavemeter>, argument: Argument) -> HandlerFuture {
    async move {
        let Argument::Channels(channels) = argument else {
            return Err(unexpected());
        };
        let mut replies = Vec::with_capacity(channels.len());
        for channel in channels {
            replies.push(channel_reply(wavemeter.get_frequency(channel).await)?);
        }
        Ok(Reply::List(replies))
    }
    .boxed()
}

fn measure_temperature(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move { Ok(Reply::Number(wavemeter.get_temperature().await?)) }.boxed()
}

fn get_channel(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move { Ok(Reply::from(wavemeter.get_channel().await?)) }.boxed()
}

fn set_channel(wavemeter: Arc<Wavemeter>, argument: Argument) -> HandlerFuture {
    async move {
        let channel = match argument {
            Argument::Integer(value) => u32::try_from(value)
                .ok()
                .filter(|channel| *channel > 0)
                .ok_or_else(|| ScpiError::InvalidSyntax(value.to_string()))?,
            _ => return Err(unexpected()),
        };
        wavemeter.set_channel(channel).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn get_channel_count(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move { Ok(Reply::from(wavemeter.get_channel_count().await?)) }.boxed()
}

fn get_switch_mode(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move { Ok(Reply::from_bool(wavemeter.get_switch_mode().await?)) }.boxed()
}

fn set_switch_mode(wavemeter: Arc<Wavemeter>, argument: Argument) -> HandlerFuture {
    async move {
        let Argument::Bool(enabled) = argument else {
            return Err(unexpected());
        };
        wavemeter.set_switch_mode(enabled).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn calibration_after(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move {
        let reading = wavemeter
            .get_calibration_wavelength(CalibrationPhase::After)
            .await?;
        Ok(Reply::Number(reading))
    }
    .boxed()
}

fn calibration_before(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move {
        let reading = wavemeter
            .get_calibration_wavelength(CalibrationPhase::Before)
            .await?;
        Ok(Reply::Number(reading))
    }
    .boxed()
}

fn calibration_difference(wavemeter: Arc<Wavemeter>, _: Argument) -> HandlerFuture {
    async move { Ok(Reply::Number(wavemeter.get_calibration_difference().await?)) }.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;
    use crate::session::DriverHub;

    fn table() -> CommandTable {
        let hub = Arc::new(DriverHub::new(Arc::new(SimulatedDriver::new())));
        CommandTable::for_wavemeter(Arc::new(Wavemeter::new(1, hub)))
    }

    #[test]
    fn test_lookup_by_short_and_long_form() {
        let table = table();
        let command = table.lookup("meas:wave:ch").unwrap();
        assert_eq!(command.mnemonic().pattern(), "MEASure:WAVElength:CHannel");
        assert!(command.operation(true).is_some());
        assert!(command.operation(false).is_none());

        assert!(table.lookup("GET:CHANNEL:COUNT").is_some());
        assert_eq!(
            table.lookup("GET:CH").unwrap().mnemonic().pattern(),
            "GET:CHannel"
        );
        assert!(table.lookup("*idn").is_some());
        assert!(table.lookup("MEAS:VOLT").is_none());
    }

    #[test]
    fn test_mandatory_commands_are_complete() {
        let table = table();
        for name in ["*CLS", "*ESE", "*OPC", "*RST", "*SRE", "*WAI"] {
            assert!(table.lookup(name).unwrap().operation(false).is_some(), "{name}");
        }
        for name in ["*ESE", "*ESR", "*IDN", "*OPC", "*SRE", "*STB", "*TST"] {
            assert!(table.lookup(name).unwrap().operation(true).is_some(), "{name}");
        }
    }

    #[test]
    fn test_decoders() {
        assert_eq!(
            decode_channels(Some("(@1:3)")),
            Ok(Argument::Channels(vec![1, 2, 3]))
        );
        assert_eq!(decode_channels(Some("4")), Ok(Argument::Channels(vec![4])));
        assert_eq!(
            decode_channels(None),
            Err(ScpiError::UnexpectedParameterCount(String::new()))
        );
        assert_eq!(
            decode_channels(Some("(@1,x)")),
            Err(ScpiError::InvalidSyntax("x".to_string()))
        );
        assert!(matches!(
            decode_none(Some("1")),
            Err(ScpiError::UnexpectedParameterCount(_))
        ));
        assert_eq!(decode_any(Some("5")), Ok(Argument::Text("5".to_string())));
        assert_eq!(decode_bool(Some("on")), Ok(Argument::Bool(true)));
        assert_eq!(decode_bool(Some("0")), Ok(Argument::Bool(false)));
        assert!(decode_bool(Some("2")).is_err());
        assert_eq!(decode_integer(Some("-3")), Ok(Argument::Integer(-3)));
    }

    #[tokio::test]
    async fn test_status_queries_are_constant() {
        let table = table();
        let opc = table.lookup("*OPC").unwrap().operation(true).unwrap();
        let reply = (opc.handler)(Arc::clone(table.wavemeter()), Argument::None)
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(1));

        let stb = table.lookup("*STB").unwrap().operation(true).unwrap();
        let reply = (stb.handler)(Arc::clone(table.wavemeter()), Argument::None)
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(0));
    }
}
