//! TCP device server.
//!
//! The server holds a [`Registry`] of named devices and answers
//! newline-delimited JSON requests (see [`xpad::wire`]). Each client
//! connection is served by its own thread; calls on one device are
//! serialized.
//!
//! ```no_run
//! use xpad_sim::config::ServerConfig;
//! use xpad_sim::server::DeviceServer;
//!
//! let server = DeviceServer::bind(&ServerConfig::default().with_bind("127.0.0.1:0"))?;
//! let handle = server.spawn()?;
//! println!("serving on {}", handle.addr());
//! handle.shutdown();
//! # Ok::<(), xpad_sim::server::ServerError>(())
//! ```

use std::collections::HashMap;
use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use xpad::wire::{self, Call, Reply, Request};
use xpad::{reasons, DevFailed, DevResult, DevState, DeviceData, DeviceName, DeviceProxy};

use crate::camera::{CameraError, XpadCamera};
use crate::config::ServerConfig;
use crate::devices::{dispatch, DeviceHandler, GenericDetector, XpadSpecific};

/// Sleep between two accept attempts when no client is waiting.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("device error: {0}")]
    Device(#[from] DevFailed),
}

type SharedDevice = Arc<Mutex<Box<dyn DeviceHandler>>>;

/// Devices hosted by a server, by lowercase name.
#[derive(Default)]
pub struct Registry {
    devices: HashMap<String, SharedDevice>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera plus the generic and the specific device of `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let camera = Arc::new(XpadCamera::new(config.model, config.modules)?);
        let mut registry = Self::new();
        registry.add(
            &config.generic_name,
            Box::new(GenericDetector::new(&config.generic_name, camera.clone())),
        )?;
        registry.add(
            &config.specific_name,
            Box::new(XpadSpecific::new(&config.specific_name, camera)),
        )?;
        for alias in &config.specific_aliases {
            registry.alias(alias, &config.specific_name)?;
        }
        Ok(registry)
    }

    pub fn add(&mut self, name: &str, device: Box<dyn DeviceHandler>) -> DevResult<()> {
        let name: DeviceName = name.parse()?;
        debug!("Registering {} as {}", device.class_name(), name);
        self.devices
            .insert(name.as_str().to_string(), Arc::new(Mutex::new(device)));
        Ok(())
    }

    /// Make `alias` resolve to the already registered `target`.
    pub fn alias(&mut self, alias: &str, target: &str) -> DevResult<()> {
        let alias: DeviceName = alias.parse()?;
        let device = self.lookup(target)?;
        self.devices.insert(alias.as_str().to_string(), device);
        Ok(())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, device: &str) -> DevResult<SharedDevice> {
        let name: DeviceName = device.parse()?;
        self.devices.get(name.as_str()).cloned().ok_or_else(|| {
            DevFailed::new(
                reasons::DEVICE_NOT_DEFINED,
                format!("Device {name} is not defined on this server"),
                "Registry::lookup",
            )
        })
    }

    /// Run one call against a named device.
    pub fn call(&self, device: &str, call: Call) -> DevResult<DeviceData> {
        let shared = self.lookup(device)?;
        let mut handler = shared.lock().unwrap_or_else(PoisonError::into_inner);
        dispatch(&mut **handler, call)
    }

    pub fn handle(&self, request: Request) -> Reply {
        debug!("{} <- {}", request.device, request.call.label());
        let result = self.call(&request.device, request.call);
        if let Err(failure) = &result {
            debug!("{} failed: {}", request.device, failure);
        }
        Reply::from_result(result)
    }
}

/// Listening device server.
pub struct DeviceServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
}

impl DeviceServer {
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let registry = Registry::from_config(config)?;
        Self::with_registry(&config.bind, registry)
    }

    pub fn with_registry(bind: &str, registry: Registry) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;

        info!(
            "Device server listening on {} ({})",
            listener.local_addr()?,
            registry.names().join(", ")
        );

        Ok(Self {
            listener,
            registry: Arc::new(registry),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Serve from a background thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let addr = self.addr()?;
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("device-server".to_string())
            .spawn(move || self.run())?;

        Ok(ServerHandle {
            addr,
            running,
            handle: Some(handle),
        })
    }

    /// Accept clients until stopped (blocking).
    pub fn run(self) -> Result<(), ServerError> {
        while self.running.load(Ordering::SeqCst) {
            let (stream, peer) = match self.listener.accept() {
                Ok(client) => client,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                    continue;
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    return Err(e.into());
                }
            };

            info!("Client connected: {}", peer);
            let registry = self.registry.clone();
            let spawned = thread::Builder::new()
                .name(format!("client-{peer}"))
                .spawn(move || serve_client(stream, peer, &registry));
            if let Err(e) = spawned {
                warn!("Cannot serve client {}: {}", peer, e);
            }
        }

        info!("Device server stopped");
        Ok(())
    }
}

fn serve_client(stream: TcpStream, peer: SocketAddr, registry: &Registry) {
    let reader = match stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_nodelay(true))
        .and_then(|_| stream.try_clone())
    {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Client {}: {}", peer, e);
            return;
        }
    };
    let mut reader = BufReader::new(reader);
    let mut writer = stream;

    loop {
        let line = match wire::read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Client {}: {}", peer, e);
                break;
            }
        };
        trace!("recv {:?}", line);

        let reply = match wire::decode_line::<Request>(&line) {
            Ok(request) => registry.handle(request),
            Err(failure) => Reply::from_result(Err(failure)),
        };

        let sent = wire::encode_line(&reply)
            .map_err(|f| io::Error::new(io::ErrorKind::InvalidData, f))
            .and_then(|bytes| writer.write_all(&bytes))
            .and_then(|_| writer.flush());
        if let Err(e) = sent {
            warn!("Client {}: {}", peer, e);
            break;
        }
    }

    info!("Client disconnected: {}", peer);
}

/// Handle on a spawned server; dropping it stops the server.
pub struct ServerHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting clients and wait for the accept thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(Err(e)) => error!("Device server failed: {}", e),
                Err(_) => error!("Device server thread panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// In-process proxy on a registry, without a socket.
pub struct LocalProxy {
    name: DeviceName,
    registry: Arc<Registry>,
}

impl LocalProxy {
    pub fn new(name: &str, registry: Arc<Registry>) -> DevResult<Self> {
        let name: DeviceName = name.parse()?;
        registry.call(name.as_str(), Call::Ping)?;
        Ok(Self { name, registry })
    }

    fn call(&self, call: Call) -> DevResult<DeviceData> {
        self.registry.call(self.name.as_str(), call)
    }
}

impl DeviceProxy for LocalProxy {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    fn ping(&mut self) -> DevResult<Duration> {
        let start = Instant::now();
        self.call(Call::Ping)?;
        Ok(start.elapsed())
    }

    fn state(&mut self) -> DevResult<DevState> {
        self.call(Call::State)?.as_state()
    }

    fn status(&mut self) -> DevResult<String> {
        Ok(self.call(Call::Status)?.as_str()?.to_string())
    }

    fn read_attribute(&mut self, name: &str) -> DevResult<DeviceData> {
        self.call(Call::ReadAttribute {
            name: name.to_string(),
        })
    }

    fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()> {
        self.call(Call::WriteAttribute {
            name: name.to_string(),
            value,
        })?;
        Ok(())
    }

    fn command_inout(&mut self, name: &str, arg: DeviceData) -> DevResult<DeviceData> {
        self.call(Call::Command {
            name: name.to_string(),
            arg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::XpadModel;
    use std::io::BufRead;
    use xpad::detector::attr;

    fn test_config() -> ServerConfig {
        ServerConfig::default()
            .with_bind("127.0.0.1:0")
            .with_model(XpadModel::ImxpadS140)
    }

    #[test]
    fn test_registry_names_and_aliases() {
        let registry = Registry::from_config(&test_config()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "det/xpad/limaxpad-swing",
                "det/xpad/xpad-swing",
                "det/xpad/xpad.1"
            ]
        );
        // case-insensitive lookup
        assert!(registry.call("DET/XPAD/XPAD.1", Call::Ping).is_ok());
    }

    #[test]
    fn test_unknown_device() {
        let registry = Registry::from_config(&test_config()).unwrap();
        let reply = registry.handle(Request {
            device: "det/xpad/nothing".to_string(),
            call: Call::State,
        });
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.reason(), Some(reasons::DEVICE_NOT_DEFINED));

        let err = registry.call("not-a-device", Call::Ping).unwrap_err();
        assert_eq!(err.reason(), Some(reasons::WRONG_DEVICE_NAME));
    }

    #[test]
    fn test_local_proxy() {
        let registry = Arc::new(Registry::from_config(&test_config()).unwrap());
        let mut proxy = LocalProxy::new("det/xpad/limaxpad-swing", registry.clone()).unwrap();

        assert_eq!(proxy.state().unwrap(), DevState::Standby);
        assert_eq!(
            proxy.read_attribute(attr::DETECTOR_HEIGHT).unwrap(),
            DeviceData::Long(240)
        );
        assert!(LocalProxy::new("det/xpad/other", registry).is_err());
    }

    #[test]
    fn test_malformed_line_gets_failed_reply() {
        let handle = DeviceServer::bind(&test_config()).unwrap().spawn().unwrap();

        let mut stream = TcpStream::connect(handle.addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        stream.write_all(b"this is not json\n").unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let reply: Reply = wire::decode_line(&line).unwrap();
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.reason(), Some(reasons::COMMUNICATION_FAILED));

        // connection still usable
        stream
            .write_all(b"{\"device\":\"det/xpad/xpad-swing\",\"op\":\"state\"}\n")
            .unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
        let reply: Reply = wire::decode_line(&line).unwrap();
        assert_eq!(
            reply.into_result().unwrap(),
            DeviceData::State(DevState::Standby)
        );

        handle.shutdown();
    }

    #[test]
    fn test_shutdown_stops_accepting() {
        let handle = DeviceServer::bind(&test_config()).unwrap().spawn().unwrap();
        let addr = handle.addr();
        handle.shutdown();

        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    }
}
