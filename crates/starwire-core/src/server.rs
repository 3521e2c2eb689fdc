use crate::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A locally spawned device server
pub struct ServerProcess {
    child: Child,
    output: Option<mpsc::UnboundedReceiver<String>>,
    port: u16,
}

/// Arguments for the server binary: `-v -p <port> <driver>...`
#[must_use]
pub fn server_args(port: u16, drivers: &[String], verbose: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(drivers.len() + 3);
    if verbose {
        args.push("-v".to_string());
    }
    args.push("-p".to_string());
    args.push(port.to_string());
    args.extend(drivers.iter().cloned());
    args
}

impl ServerProcess {
    /// Spawn the server with one driver per managed device.
    ///
    /// # Errors
    ///
    /// Returns an error if the process fails to spawn or its stderr cannot
    /// be captured.
    pub fn spawn(binary: &str, port: u16, drivers: &[String], verbose: bool) -> Result<Self> {
        let args = server_args(port, drivers, verbose);
        info!(binary, port, "Starting server: {} {}", binary, args.join(" "));

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to spawn {binary}: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Process("Failed to get stderr handle".to_string()))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[server:{port}] {line}");
                if output_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            child,
            output: Some(output_rx),
            port,
        })
    }

    /// OS process id, `None` once the process has been reaped
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Take the stderr line stream (for forwarding as events)
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.take()
    }

    /// Kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed.
    pub async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| Error::Process(format!("Failed to kill server: {e}")))
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        debug!("[server:{}] Server process dropped", self.port);
    }
}
