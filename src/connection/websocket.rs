//! WebSocket transport engine backed by tungstenite.
//!
//! The socket lives on its own thread. The engine hands it control messages
//! (probe, close) over a channel, and the thread interleaves draining that
//! channel with short-timeout reads so control never waits behind a quiet
//! wire. Everything the thread observes goes back to the connection loop as
//! `EngineSignal`s tagged with this engine's id.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tungstenite::client::IntoClientRequest;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{ClientRequestBuilder, Message, WebSocket};

use crate::connection::engine::{
    ConnectTarget, EngineEvent, EngineFactory, EngineId, EngineSignal, TransportEngine,
};
use crate::error::EngineError;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

enum SocketCtrl {
    Probe,
    Close,
}

pub struct WebSocketEngine {
    engine_id: EngineId,
    target: ConnectTarget,
    signals: Sender<EngineSignal>,
    ctrl: Option<Sender<SocketCtrl>>,
}

impl WebSocketEngine {
    pub fn new(target: &ConnectTarget, engine_id: EngineId, signals: Sender<EngineSignal>) -> Self {
        Self {
            engine_id,
            target: target.clone(),
            signals,
            ctrl: None,
        }
    }

    fn emit(signals: &Sender<EngineSignal>, engine_id: EngineId, event: EngineEvent) {
        let _ = signals.send(EngineSignal::new(engine_id, event));
    }
}

impl TransportEngine for WebSocketEngine {
    fn open(&mut self) {
        let (ctrl_tx, ctrl_rx) = channel::unbounded();
        self.ctrl = Some(ctrl_tx);

        let engine_id = self.engine_id;
        let signals = self.signals.clone();
        let target = self.target.clone();

        let spawned = thread::Builder::new()
            .name(format!("chatlink-socket-{engine_id}"))
            .spawn(move || socket_thread(engine_id, target, signals, ctrl_rx));
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn socket thread");
            Self::emit(
                &self.signals,
                engine_id,
                EngineEvent::Closed(Some(EngineError::new(format!(
                    "failed to spawn socket thread: {err}"
                )))),
            );
        }
    }

    fn close(&mut self) {
        if let Some(ctrl) = self.ctrl.take() {
            let _ = ctrl.send(SocketCtrl::Close);
        }
    }

    fn send_probe(&mut self) {
        if let Some(ctrl) = &self.ctrl {
            let _ = ctrl.send(SocketCtrl::Probe);
        }
    }
}

fn socket_thread(
    engine_id: EngineId,
    target: ConnectTarget,
    signals: Sender<EngineSignal>,
    ctrl: Receiver<SocketCtrl>,
) {
    let mut socket = match open_socket(&target) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::debug!(engine_id, error = %err, "websocket handshake failed");
            WebSocketEngine::emit(&signals, engine_id, EngineEvent::Closed(Some(err)));
            return;
        }
    };

    WebSocketEngine::emit(&signals, engine_id, EngineEvent::Opened);

    // Remembered from a server close frame, reported once the close
    // handshake completes.
    let mut close_error: Option<EngineError> = None;

    loop {
        match ctrl.try_recv() {
            Ok(SocketCtrl::Probe) => {
                if let Err(err) = socket.send(Message::Ping(Bytes::new())) {
                    tracing::debug!(engine_id, error = %err, "probe send failed");
                    WebSocketEngine::emit(
                        &signals,
                        engine_id,
                        EngineEvent::Closed(Some(EngineError::new(err.to_string()))),
                    );
                    return;
                }
            }
            Ok(SocketCtrl::Close) => {
                // Start the close handshake, then keep reading until the
                // peer acknowledges.
                let _ = socket.close(None);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                let _ = socket.close(None);
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                WebSocketEngine::emit(
                    &signals,
                    engine_id,
                    EngineEvent::Frame(Bytes::from(text.to_string())),
                );
            }
            Ok(Message::Binary(payload)) => {
                WebSocketEngine::emit(&signals, engine_id, EngineEvent::Frame(payload));
            }
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    if frame.code != CloseCode::Normal {
                        close_error = Some(EngineError::new(format!(
                            "closed by peer: {} ({})",
                            frame.code, frame.reason
                        )));
                    }
                }
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                WebSocketEngine::emit(&signals, engine_id, EngineEvent::Closed(close_error));
                return;
            }
            Err(err) => {
                tracing::debug!(engine_id, error = %err, "websocket read failed");
                WebSocketEngine::emit(
                    &signals,
                    engine_id,
                    EngineEvent::Closed(Some(EngineError::new(err.to_string()))),
                );
                return;
            }
        }
    }
}

fn open_socket(target: &ConnectTarget) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, EngineError> {
    let uri = target
        .url
        .as_str()
        .parse::<http::Uri>()
        .map_err(|err| EngineError::new(format!("invalid connect url: {err}")))?;

    let mut builder = ClientRequestBuilder::new(uri);
    for (name, value) in &target.headers {
        builder = builder.with_header(name, value);
    }
    let request = builder
        .into_client_request()
        .map_err(|err| EngineError::new(format!("invalid handshake request: {err}")))?;

    let (socket, _response) =
        tungstenite::connect(request).map_err(|err| EngineError::new(err.to_string()))?;

    // A short read timeout keeps the loop responsive to control messages.
    let stream = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => Some(stream),
        MaybeTlsStream::Rustls(tls) => Some(tls.get_ref()),
        _ => None,
    };
    if let Some(stream) = stream {
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|err| EngineError::new(format!("failed to set read timeout: {err}")))?;
    }

    Ok(socket)
}

pub struct WebSocketEngineFactory;

impl EngineFactory for WebSocketEngineFactory {
    fn create(
        &self,
        target: &ConnectTarget,
        engine_id: EngineId,
        signals: Sender<EngineSignal>,
    ) -> Box<dyn TransportEngine> {
        Box::new(WebSocketEngine::new(target, engine_id, signals))
    }
}
