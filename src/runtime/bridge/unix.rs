// Unix 域套接字传输，行协议：
//   PING          -> PONG
//   LIST_MODULES  -> 每个模块一行 "package\tpath"，以 END 结束
use crate::errno::Errno;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{BridgeConnection, BridgeContext, BridgeError, BridgeTransport, ModuleDescriptor};

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);
const END_MARKER: &str = "END";
// 防止对端无限输出
const MAX_MODULE_LINES: usize = 1024;

pub struct UnixSocketTransport {
    path: PathBuf,
    timeout: Duration,
}

impl UnixSocketTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BridgeTransport for UnixSocketTransport {
    fn open(&self, _ctx: &BridgeContext) -> Result<Box<dyn BridgeConnection>, BridgeError> {
        let stream = UnixStream::connect(&self.path).map_err(|err| {
            BridgeError::unreachable(format!("connect {}: {}", self.path.display(), err))
        })?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .map_err(io_error)?;
        let reader = BufReader::new(stream.try_clone().map_err(io_error)?);
        Ok(Box::new(UnixSocketConnection { stream, reader }))
    }
}

struct UnixSocketConnection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl UnixSocketConnection {
    fn send(&mut self, command: &str) -> Result<(), BridgeError> {
        self.stream
            .write_all(format!("{command}\n").as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(io_error)
    }

    fn read_line(&mut self) -> Result<String, BridgeError> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).map_err(io_error)?;
        if read == 0 {
            return Err(BridgeError::unreachable("peer closed the connection"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl BridgeConnection for UnixSocketConnection {
    fn is_alive(&mut self) -> bool {
        self.send("PING").is_ok() && self.read_line().is_ok_and(|reply| reply == "PONG")
    }

    fn list_modules(&mut self) -> Result<Vec<ModuleDescriptor>, BridgeError> {
        self.send("LIST_MODULES")?;
        let mut modules = Vec::new();
        for _ in 0..MAX_MODULE_LINES {
            let line = self.read_line()?;
            if line == END_MARKER {
                return Ok(modules);
            }
            if let Some(module) = parse_module_line(&line) {
                modules.push(module);
            }
        }
        Err(BridgeError::new(Errno::Format, "module list not terminated"))
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

// 格式不符的行直接跳过
fn parse_module_line(line: &str) -> Option<ModuleDescriptor> {
    let (package_name, apk_path) = line.split_once('\t')?;
    let package_name = package_name.trim();
    if package_name.is_empty() {
        return None;
    }
    Some(ModuleDescriptor {
        package_name: package_name.to_string(),
        apk_path: apk_path.trim().to_string(),
    })
}

fn io_error(err: std::io::Error) -> BridgeError {
    BridgeError::new(Errno::Io, err.to_string())
}
