//! End-to-end tests of the SCPI server over TCP against simulated wavemeters.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wlm_scpi::config::{ServerConfig, WavemeterEndpoint};
use wlm_scpi::driver::SimulatedDriver;
use wlm_scpi::session::SessionState;
use wlm_scpi::{DriverHub, ServerError, Wavemeter, WavemeterServer};

struct TestServer {
    addr: SocketAddr,
    wavemeter: Arc<Wavemeter>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(driver: Arc<SimulatedDriver>, product_id: i32, config: ServerConfig) -> Self {
        let hub = Arc::new(DriverHub::new(driver));
        let endpoint = WavemeterEndpoint {
            product_id,
            interfaces: vec!["127.0.0.1".parse().unwrap()],
            port: 0,
        };
        let server = WavemeterServer::bind(&endpoint, hub, config).await.unwrap();
        let addr = server.local_addrs().unwrap()[0];
        let wavemeter = Arc::clone(server.wavemeter());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(shutdown.clone()));
        Self {
            addr,
            wavemeter,
            shutdown,
            task,
        }
    }

    async fn client(&self) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let (read, write) = stream.into_split();
        (BufReader::new(read).lines(), write)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
        assert_eq!(self.wavemeter.state(), SessionState::Disconnected);
    }
}

async fn next_reply(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("reply timed out")
        .unwrap()
        .expect("connection closed")
}

#[tokio::test]
async fn test_identification_and_measurements() {
    let driver = Arc::new(SimulatedDriver::with_wavemeters([4711]));
    let server = TestServer::start(driver, 4711, ServerConfig::default()).await;
    let (mut replies, mut requests) = server.client().await;

    requests.write_all(b"*IDN?\n").await.unwrap();
    assert_eq!(next_reply(&mut replies).await, "HIGHFINESSE,WS8,4711,8.1234");

    requests
        .write_all(b"MEAS:WAVE:CH? (@3:1);meas:temp?\n")
        .await
        .unwrap();
    assert_eq!(next_reply(&mut replies).await, "711.5,711.25,711");
    assert_eq!(next_reply(&mut replies).await, "23.5");

    requests
        .write_all(b"GET:SWIT 1;GET:CH 4;GET:SWIT?;GET:CH?;GET:CAL:DIF?\n")
        .await
        .unwrap();
    assert_eq!(next_reply(&mut replies).await, "1");
    assert_eq!(next_reply(&mut replies).await, "4");
    assert_eq!(next_reply(&mut replies).await, "0.00025");

    drop(requests);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_command_inside_line() {
    let driver = Arc::new(SimulatedDriver::with_wavemeters([1]));
    let server = TestServer::start(driver, 1, ServerConfig::default()).await;
    let (mut replies, mut requests) = server.client().await;

    requests
        .write_all(b"*OPC?;SYST:ERR?;GET:CH:COUNT?\n")
        .await
        .unwrap();
    assert_eq!(next_reply(&mut replies).await, "1");
    assert_eq!(next_reply(&mut replies).await, "8");

    requests.write_all(b"MEAS:WAVE:CH? (1,2)\n").await.unwrap();
    assert_eq!(
        next_reply(&mut replies).await,
        "-102,\"Invalid syntax;(1,2)\""
    );

    server.stop().await;
}

#[tokio::test]
async fn test_timed_out_query_keeps_connection() {
    let driver = Arc::new(SimulatedDriver::with_wavemeters([1]));
    let config = ServerConfig {
        device_timeout_ms: 100,
        ..ServerConfig::default()
    };
    let server = TestServer::start(driver.clone(), 1, config).await;
    let (mut replies, mut requests) = server.client().await;

    driver.set_latency(Duration::from_millis(300));
    requests.write_all(b"MEAS:TEMP?;*OPC?\n").await.unwrap();

    // No reply for the timed-out query, and the rest of the line is dropped
    let early = tokio::time::timeout(Duration::from_millis(250), replies.next_line()).await;
    assert!(early.is_err());

    driver.set_latency(Duration::ZERO);
    requests.write_all(b"*STB?;GET:CH:COUNT?\n").await.unwrap();
    assert_eq!(next_reply(&mut replies).await, "0");
    assert_eq!(next_reply(&mut replies).await, "8");

    server.stop().await;
}

#[tokio::test]
async fn test_slow_wavemeter_stalls_reader() {
    let driver = Arc::new(SimulatedDriver::with_wavemeters([1]));
    let server = TestServer::start(driver.clone(), 1, ServerConfig::default()).await;
    let wavemeter = Arc::clone(&server.wavemeter);

    let hub = Arc::clone(wavemeter.hub());
    let (client, server_side) = tokio::io::duplex(64);
    let handler = wlm_scpi::server::ConnectionHandler::new(
        Arc::clone(&wavemeter),
        &ServerConfig::default(),
    );
    let shutdown = CancellationToken::new();
    let connection = tokio::spawn(handler.run(server_side, "duplex".to_string(), shutdown.clone()));

    let (read, mut write) = tokio::io::split(client);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();
        let mut count = 0;
        while let Ok(Some(_)) = lines.next_line().await {
            count += 1;
        }
        count
    });

    driver.set_latency(Duration::from_millis(50));
    let request = b"MEAS:TEMP?\n".repeat(40);

    // The reader stops accepting input once the queue is full
    let blocked = tokio::time::timeout(Duration::from_millis(100), write.write_all(&request)).await;
    assert!(blocked.is_err());

    shutdown.cancel();
    connection.await.unwrap();
    drop(write);
    let answered = reader.await.unwrap();
    assert!(answered < 40);

    driver.set_latency(Duration::ZERO);
    assert_eq!(hub.live_sessions().await, vec![1]);
    server.stop().await;
}

#[tokio::test]
async fn test_bind_failure_disconnects_session() {
    let driver = Arc::new(SimulatedDriver::with_wavemeters([1, 2]));
    let hub = Arc::new(DriverHub::new(driver));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = WavemeterEndpoint {
        product_id: 2,
        interfaces: vec!["127.0.0.1".parse().unwrap()],
        port,
    };

    let result = WavemeterServer::bind(&endpoint, hub.clone(), ServerConfig::default()).await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));
    assert!(hub.live_sessions().await.is_empty());
    assert!(!hub.callback_installed().await);
}
