//! TCP implementation of [`DeviceProxy`].
//!
//! A [`TcpDeviceProxy`] owns one TCP stream to the device server hosting the
//! device and exchanges [`wire`](crate::wire) messages over it. The server
//! address comes from the device name (`tcp://host:port/...`), then from the
//! `XPAD_HOST` environment variable, then from [`DEFAULT_HOST`].
//!
//! A call that fails on the transport (timeout, reset, hang-up) drops the
//! stream, since a late reply would otherwise be read as the answer to the
//! next request. The next call opens a fresh stream.
//!
//! # Example
//!
//! ```no_run
//! use xpad::{DeviceProxy, TcpDeviceProxy};
//!
//! let mut proxy = TcpDeviceProxy::connect("det/xpad/xpad.1")?;
//! println!("-> ping {} us", proxy.ping()?.as_micros());
//! println!("state: {}", proxy.state()?);
//! # Ok::<(), xpad::DevFailed>(())
//! ```

use std::io::{BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::failure::{reasons, DevFailed, DevResult};
use crate::proxy::{DevState, DeviceData, DeviceName, DeviceProxy};
use crate::wire::{self, Call, Reply, Request};

/// Server address used when neither the name nor the environment gives one.
pub const DEFAULT_HOST: &str = "127.0.0.1:10000";

/// Environment variable naming the device server address.
pub const HOST_ENV_VAR: &str = "XPAD_HOST";

/// Default client timeout for one call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection settings of a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// `host:port` of the device server; `None` falls back to the environment
    pub host: Option<String>,
    /// Read/write timeout of each call
    pub timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ProxyConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Server address for `name`: name override, then config, then
    /// `XPAD_HOST`, then [`DEFAULT_HOST`].
    pub fn resolve_host(&self, name: &DeviceName) -> String {
        if let Some(host) = name.host() {
            return host.to_string();
        }
        if let Some(host) = &self.host {
            return host.clone();
        }
        std::env::var(HOST_ENV_VAR)
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }
}

/// One open stream to the device server.
struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Connection {
    fn open(addr: &SocketAddr, timeout: Duration) -> std::io::Result<Self> {
        let stream = TcpStream::connect_timeout(addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
        })
    }

    fn set_timeout(&self, timeout: Duration) -> std::io::Result<()> {
        self.writer.set_read_timeout(Some(timeout))?;
        self.writer.set_write_timeout(Some(timeout))
    }

    /// Write `line` and read one reply line.
    fn exchange(&mut self, line: &[u8]) -> std::io::Result<String> {
        self.writer.write_all(line)?;
        self.writer.flush()?;
        wire::read_line(&mut self.reader)?.ok_or_else(|| {
            std::io::Error::new(ErrorKind::UnexpectedEof, "connection closed by server")
        })
    }
}

/// Device proxy over a TCP stream.
pub struct TcpDeviceProxy {
    name: DeviceName,
    host: String,
    addr: SocketAddr,
    conn: Option<Connection>,
    timeout: Duration,
}

impl TcpDeviceProxy {
    /// Connect to `name` with the default configuration.
    pub fn connect(name: &str) -> DevResult<Self> {
        Self::connect_with(name, &ProxyConfig::default())
    }

    /// Connect to `name` and check that the server hosts it.
    ///
    /// # Errors
    ///
    /// - `API_WrongDeviceName` if `name` is malformed
    /// - `API_CantConnectToDevice` if the server cannot be reached
    /// - `API_DeviceNotDefined` if the server does not host the device
    pub fn connect_with(name: &str, config: &ProxyConfig) -> DevResult<Self> {
        let name: DeviceName = name.parse()?;
        let host = config.resolve_host(&name);
        let origin = "TcpDeviceProxy::connect";

        let cant_connect = |why: String| {
            DevFailed::new(
                reasons::CANT_CONNECT,
                format!("Failed to connect to device {name} at {host}: {why}"),
                origin,
            )
        };

        let addr = host
            .to_socket_addrs()
            .map_err(|e| cant_connect(e.to_string()))?
            .next()
            .ok_or_else(|| cant_connect("address did not resolve".to_string()))?;

        let conn =
            Connection::open(&addr, config.timeout).map_err(|e| cant_connect(e.to_string()))?;

        debug!("Connected to {} via {}", name, host);

        let mut proxy = Self {
            name,
            host,
            addr,
            conn: Some(conn),
            timeout: config.timeout,
        };
        proxy.call(Call::Ping)?;
        Ok(proxy)
    }

    /// Address of the device server.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a stream is open; `false` after a transport failure until the
    /// next call reconnects.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Change the timeout of subsequent calls.
    pub fn set_timeout(&mut self, timeout: Duration) -> DevResult<()> {
        self.timeout = timeout;
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        if let Err(e) = conn.set_timeout(timeout) {
            warn!("Failed to set timeout on {}: {}", self.name, e);
            self.conn = None;
            return Err(DevFailed::new(
                reasons::COMMUNICATION_FAILED,
                format!("Failed to set timeout on device {}: {e}", self.name),
                "TcpDeviceProxy::set_timeout",
            ));
        }
        Ok(())
    }

    fn io_failure(&self, call: &Call, e: std::io::Error) -> DevFailed {
        let origin = format!("TcpDeviceProxy::{}", call.label());
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => DevFailed::new(
                reasons::DEVICE_TIMED_OUT,
                format!(
                    "Timeout ({} ms) exceeded on device {}",
                    self.timeout.as_millis(),
                    self.name
                ),
                origin,
            ),
            _ => DevFailed::new(
                reasons::COMMUNICATION_FAILED,
                format!("Communication with device {} failed: {e}", self.name),
                origin,
            ),
        }
    }

    /// Send one request and wait for its reply.
    fn call(&mut self, call: Call) -> DevResult<DeviceData> {
        let request = Request {
            device: self.name.as_str().to_string(),
            call,
        };
        let line = wire::encode_line(&request)?;

        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                debug!("Reconnecting to {} via {}", self.name, self.host);
                Connection::open(&self.addr, self.timeout).map_err(|e| {
                    DevFailed::new(
                        reasons::CANT_CONNECT,
                        format!(
                            "Failed to reconnect to device {} at {}: {e}",
                            self.name, self.host
                        ),
                        format!("TcpDeviceProxy::{}", request.call.label()),
                    )
                })?
            }
        };
        let conn = self.conn.insert(conn);

        debug!("send {} -> {}", request.call.label(), self.name);
        let reply_line = match conn.exchange(&line) {
            Ok(line) => line,
            Err(e) => {
                self.conn = None;
                return Err(self.io_failure(&request.call, e));
            }
        };
        trace!("recv {:?}", reply_line);

        let reply: Reply = wire::decode_line(&reply_line)?;
        reply.into_result()
    }
}

impl DeviceProxy for TcpDeviceProxy {
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
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    /// Serve `replies` in order to the first client, one per request line.
    fn scripted_server(replies: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    return;
                }
                writer.write_all(reply.as_bytes()).unwrap();
                writer.write_all(b"\n").unwrap();
            }
        });
        addr
    }

    const OK_VOID: &str = r#"{"status":"ok","value":{"type":"void"}}"#;

    #[test]
    fn test_resolve_host_order() {
        let plain: DeviceName = "a/b/c".parse().unwrap();
        let hosted: DeviceName = "tcp://h:1/a/b/c".parse().unwrap();
        let config = ProxyConfig::default().with_host("cfg:2");

        assert_eq!(config.resolve_host(&hosted), "h:1");
        assert_eq!(config.resolve_host(&plain), "cfg:2");
    }

    #[test]
    fn test_connect_pings_and_reads_state() {
        let addr = scripted_server(vec![
            OK_VOID,
            r#"{"status":"ok","value":{"type":"state","value":"RUNNING"}}"#,
        ]);
        let config = ProxyConfig::default().with_host(addr.clone());

        let mut proxy = TcpDeviceProxy::connect_with("det/xpad/limaxpad", &config).unwrap();
        assert_eq!(proxy.host(), addr);
        assert_eq!(proxy.state().unwrap(), DevState::Running);
    }

    #[test]
    fn test_failed_reply_becomes_dev_failed() {
        let addr = scripted_server(vec![
            OK_VOID,
            r#"{"status":"failed","errors":[{"reason":"API_CommandNotFound","desc":"no Foo","origin":"server","severity":"ERR"}]}"#,
        ]);
        let config = ProxyConfig::default().with_host(addr);

        let mut proxy = TcpDeviceProxy::connect_with("a/b/c", &config).unwrap();
        let err = proxy.command("Foo").unwrap_err();
        assert_eq!(err.reason(), Some(reasons::COMMAND_NOT_FOUND));
    }

    #[test]
    fn test_unknown_device_fails_on_connect() {
        let addr = scripted_server(vec![
            r#"{"status":"failed","errors":[{"reason":"API_DeviceNotDefined","desc":"a/b/c","origin":"server","severity":"ERR"}]}"#,
        ]);
        let config = ProxyConfig::default().with_host(addr);

        let err = TcpDeviceProxy::connect_with("a/b/c", &config).err().unwrap();
        assert_eq!(err.reason(), Some(reasons::DEVICE_NOT_DEFINED));
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = ProxyConfig::default().with_host(addr);
        let err = TcpDeviceProxy::connect_with("a/b/c", &config).err().unwrap();
        assert_eq!(err.reason(), Some(reasons::CANT_CONNECT));
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let config = ProxyConfig::default()
            .with_host(addr)
            .with_timeout(Duration::from_millis(100));
        let err = TcpDeviceProxy::connect_with("a/b/c", &config).err().unwrap();
        assert_eq!(err.reason(), Some(reasons::DEVICE_TIMED_OUT));
        handle.join().unwrap();
    }

    #[test]
    fn test_late_reply_is_not_read_by_next_call() {
        const STALE: &str = r#"{"status":"ok","value":{"type":"long","value":111}}"#;
        const FRESH: &str = r#"{"status":"ok","value":{"type":"long","value":222}}"#;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (first, _) = listener.accept().unwrap();
            thread::spawn(move || {
                let mut reader = BufReader::new(first.try_clone().unwrap());
                let mut writer = first;
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                writer.write_all(format!("{OK_VOID}\n").as_bytes()).unwrap();
                line.clear();
                reader.read_line(&mut line).unwrap();
                thread::sleep(Duration::from_millis(300));
                let _ = writer.write_all(format!("{STALE}\n").as_bytes());
            });

            let (second, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(second.try_clone().unwrap());
            let mut writer = second;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            writer.write_all(format!("{FRESH}\n").as_bytes()).unwrap();
        });

        let config = ProxyConfig::default()
            .with_host(addr)
            .with_timeout(Duration::from_millis(100));
        let mut proxy = TcpDeviceProxy::connect_with("a/b/c", &config).unwrap();

        let err = proxy.read_attribute("nbFrames").unwrap_err();
        assert_eq!(err.reason(), Some(reasons::DEVICE_TIMED_OUT));
        assert!(!proxy.is_connected());

        let value = proxy.read_attribute("currentFrame").unwrap();
        assert_eq!(value, DeviceData::Long(222));
        assert!(proxy.is_connected());
    }

    #[test]
    fn test_set_timeout_applies_to_open_stream() {
        let addr = scripted_server(vec![OK_VOID]);
        let config = ProxyConfig::default().with_host(addr);

        let mut proxy = TcpDeviceProxy::connect_with("a/b/c", &config).unwrap();
        proxy.set_timeout(Duration::from_millis(250)).unwrap();
        assert_eq!(proxy.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_server_hangup_is_communication_failure() {
        let addr = scripted_server(vec![OK_VOID]);
        let config = ProxyConfig::default().with_host(addr);

        let mut proxy = TcpDeviceProxy::connect_with("a/b/c", &config).unwrap();
        let err = proxy.state().unwrap_err();
        assert_eq!(err.reason(), Some(reasons::COMMUNICATION_FAILED));
    }
}
