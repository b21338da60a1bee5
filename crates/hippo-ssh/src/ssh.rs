//! SSH command execution and file transfer using russh

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hippo_exec::command::{compose, mkdir_p, shell_quote};
use hippo_exec::path::resolve;
use hippo_exec::{CommandResult, ExecError, Shell, SshConfig, settle};
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::AuthMethod;
use crate::scp::{self, ScpStream};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

type Session = client::Handle<SshClientHandler>;

/// Shell on a remote host over one persistent SSH connection
///
/// The connection is opened by [`SshShell::connect`] and closed once, by
/// [`SshShell::close`] or when the shell is dropped. There is no reconnect:
/// after the connection is lost every operation fails.
pub struct SshShell {
    /// Connection configuration
    config: SshConfig,
    /// SSH session, `None` once closed
    session: Mutex<Option<Session>>,
}

impl fmt::Debug for SshShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshShell")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SshShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SSH_Env_{}_{}_at_{}",
            self.config.name, self.config.username, self.config.host
        )
    }
}

impl SshShell {
    /// Connect and authenticate to the configured host
    ///
    /// The TCP connect is bounded by the connect timeout, the SSH handshake
    /// and authentication by the banner timeout. A key file takes precedence
    /// over a password.
    ///
    /// # Errors
    /// Returns `ExecError::ConnectionFailed`, `ExecError::AuthenticationFailed`
    /// or `ExecError::SshKeyError`; failures are logged and never retried
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect(config: SshConfig) -> Result<Self, ExecError> {
        match Self::open_session(&config).await {
            Ok(session) => Ok(Self {
                config,
                session: Mutex::new(Some(session)),
            }),
            Err(e) => {
                error!(host = %config.host, port = config.port, error = %e, "SSH connection failed");
                Err(e)
            }
        }
    }

    async fn open_session(config: &SshConfig) -> Result<Session, ExecError> {
        let auth = AuthMethod::from_config(config)
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        info!(
            host = %config.host,
            port = config.port,
            user = %config.username,
            auth = auth.kind(),
            "connecting to SSH"
        );

        let connect_timeout = config.connect_timeout;
        let stream = timeout(
            connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| {
            ExecError::ConnectionFailed(format!(
                "{}:{} did not accept a connection within {connect_timeout:?}",
                config.host, config.port
            ))
        })?
        .map_err(|e| ExecError::ConnectionFailed(format!("{}:{}: {e}", config.host, config.port)))?;

        let banner_timeout = config.banner_timeout;
        let handshake = async {
            let client_config = Arc::new(client::Config::default());
            let mut session = client::connect_stream(client_config, stream, SshClientHandler)
                .await
                .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;
            authenticate(&mut session, &config.username, &auth).await?;
            Ok::<_, ExecError>(session)
        };

        let session = timeout(banner_timeout, handshake).await.map_err(|_| {
            ExecError::ConnectionFailed(format!(
                "no SSH banner or authentication from {}:{} within {banner_timeout:?}",
                config.host, config.port
            ))
        })??;

        info!(host = %config.host, "SSH connected and authenticated");
        Ok(session)
    }

    /// Get configuration
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Whether the session handle is still held
    pub fn is_connected(&self) -> bool {
        // try_lock: a busy session is in use, hence connected
        self.session
            .try_lock()
            .map(|s| s.as_ref().is_some_and(|h| !h.is_closed()))
            .unwrap_or(true)
    }

    /// Open a session channel and start `cmd` on it
    async fn open_exec_channel(
        &self,
        cmd: &str,
    ) -> Result<russh::Channel<client::Msg>, ExecError> {
        let mut session_lock = self.session.lock().await;
        let session = session_lock.as_mut().ok_or(ExecError::NotConnected)?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        Ok(channel)
    }

    /// Execute command on remote host
    #[instrument(skip(self, cmd), fields(host = %self.config.host))]
    async fn execute_remote(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        let mut channel = self.open_exec_channel(cmd).await?;

        // Collect output until the channel closes; the exit status may
        // arrive after EOF
        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        // stderr
                        stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = exit_status.cast_signed();
                }
                _ => {}
            }
        }

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult::completed(status, stdout, stderr, duration))
    }

    /// SCP `local` into the existing remote directory `remote_dir`
    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), ExecError> {
        let channel = self
            .open_exec_channel(&format!("scp -r -t -- {}", shell_quote(remote_dir)))
            .await?;
        let mut stream = ScpStream::new(Box::pin(channel.into_stream()), self.config.copy_timeout);

        scp::upload(&mut stream, local).await?;
        stream.finish().await
    }

    /// SCP `remote` (file or directory) into the local folder `local_dir`
    async fn download(&self, remote: &str, local_dir: &Path) -> Result<(), ExecError> {
        let channel = self
            .open_exec_channel(&format!("scp -r -f -- {}", shell_quote(remote)))
            .await?;
        let mut stream = ScpStream::new(Box::pin(channel.into_stream()), self.config.copy_timeout);

        scp::download(&mut stream, local_dir).await
    }

    /// Close the connection. Later calls are no-ops.
    ///
    /// # Errors
    /// Returns `ExecError::IoError` if disconnection fails
    pub async fn close(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.config.host, "SSH disconnected");
        }
        Ok(())
    }
}

async fn authenticate(
    session: &mut Session,
    user: &str,
    auth: &AuthMethod,
) -> Result<(), ExecError> {
    let auth_res = match auth {
        AuthMethod::KeyFile(path) => {
            debug!(key = %path.display(), "using SSH key for authentication");
            let key_pair =
                load_secret_key(path, None).map_err(|e| ExecError::SshKeyError(e.to_string()))?;

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            session
                .authenticate_publickey(
                    user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                )
                .await
        }
        AuthMethod::Password(password) => {
            debug!("using password for authentication");
            session.authenticate_password(user, password.as_str()).await
        }
    }
    .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

    if !auth_res.success() {
        return Err(ExecError::AuthenticationFailed(format!(
            "{} authentication rejected for user {user}",
            auth.kind()
        )));
    }

    Ok(())
}

impl Drop for SshShell {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().take() else {
            return;
        };

        // Without a runtime, dropping the handle still tears the session down
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let host = self.config.host.clone();
            runtime.spawn(async move {
                match session
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                {
                    Ok(()) => debug!(host = %host, "SSH disconnected on drop"),
                    Err(e) => warn!(host = %host, error = %e, "SSH disconnect on drop failed"),
                }
            });
        }
    }
}

#[async_trait]
impl Shell for SshShell {
    async fn exec(
        &self,
        command: &str,
        relative_path: &str,
        ignore_error: bool,
    ) -> Result<CommandResult, ExecError> {
        let dir = resolve(&self.config.root_path, relative_path);
        let remote_cmd = compose(&dir, self.config.env_cmd.as_deref(), command);

        debug!(host = %self.config.host, command = %remote_cmd, "exec");

        let outcome = self.execute_remote(&remote_cmd).await;
        settle(&self.to_string(), &remote_cmd, outcome, ignore_error)
    }

    async fn send(&self, local_path: &Path, relative_path: &str) {
        let remote = resolve(&self.config.root_path, relative_path);
        debug!(
            src = %local_path.display(),
            dest = %format!("{}@{}:{remote}", self.config.username, self.config.host),
            "sending file"
        );

        match self.exec(&mkdir_p(&remote), ".", true).await {
            Ok(result) if result.success() => {}
            Ok(result) => debug!(
                dest = %remote,
                status = result.status,
                output = %result.output.trim(),
                "mkdir before upload failed"
            ),
            Err(e) => debug!(dest = %remote, error = %e, "mkdir before upload failed"),
        }

        if let Err(e) = self.upload(local_path, &remote).await {
            error!(src = %local_path.display(), dest = %remote, error = %e, "scp upload failed");
        }
    }

    async fn pull(&self, local_folder: &Path, relative_path: &str) {
        let remote = resolve(&self.config.root_path, relative_path);
        debug!(
            src = %format!("{}@{}:{remote}", self.config.username, self.config.host),
            dest = %local_folder.display(),
            "downloading file"
        );

        if let Err(e) = tokio::fs::create_dir_all(local_folder).await {
            error!(dest = %local_folder.display(), error = %e, "failed to create local folder");
            return;
        }

        if let Err(e) = self.download(&remote, local_folder).await {
            error!(src = %remote, dest = %local_folder.display(), error = %e, "scp download failed");
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn root_path(&self) -> &str {
        &self.config.root_path
    }

    fn shell_type(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use russh::keys::ssh_key::rand_core::OsRng;
    use russh::keys::{Algorithm, PrivateKey};
    use russh::server::{self, Auth};
    use russh::{ChannelId, CryptoVec};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const PASSWORD: &str = "hunter2";
    const SCP_TIMEOUT: Duration = Duration::from_secs(5);

    /// In-process sshd: exec requests run through the local `sh`, and the
    /// `scp -t`/`scp -f` commands are served with this crate's own SCP code.
    #[derive(Clone)]
    struct FakeSshd;

    impl server::Handler for FakeSshd {
        type Error = russh::Error;

        async fn auth_password(&mut self, _user: &str, password: &str) -> Result<Auth, Self::Error> {
            if password == PASSWORD {
                Ok(Auth::Accept)
            } else {
                Ok(Auth::reject())
            }
        }

        async fn channel_open_session(
            &mut self,
            channel: russh::Channel<server::Msg>,
            session: &mut server::Session,
        ) -> Result<bool, Self::Error> {
            tokio::spawn(serve_channel(channel, session.handle()));
            Ok(true)
        }

        async fn exec_request(
            &mut self,
            channel: ChannelId,
            _data: &[u8],
            session: &mut server::Session,
        ) -> Result<(), Self::Error> {
            session.channel_success(channel)
        }
    }

    fn unquote(arg: &str) -> String {
        arg.trim_matches('\'').replace("'\\''", "'")
    }

    async fn serve_channel(mut channel: russh::Channel<server::Msg>, handle: server::Handle) {
        let id = channel.id();
        let command = loop {
            match channel.wait().await {
                Some(ChannelMsg::Exec { command, .. }) => {
                    break String::from_utf8_lossy(&command).into_owned();
                }
                Some(_) => {}
                None => return,
            }
        };

        let status = if let Some(dir) = command.strip_prefix("scp -r -t -- ") {
            let mut stream = ScpStream::new(Box::pin(channel.into_stream()), SCP_TIMEOUT);
            u32::from(scp::download(&mut stream, Path::new(&unquote(dir))).await.is_err())
        } else if let Some(path) = command.strip_prefix("scp -r -f -- ") {
            let path = unquote(path);
            let mut raw = Box::pin(channel.into_stream());
            if Path::new(&path).exists() {
                let mut stream = ScpStream::new(raw, SCP_TIMEOUT);
                let sent = scp::upload(&mut stream, Path::new(&path)).await;
                stream.finish().await.unwrap();
                u32::from(sent.is_err())
            } else {
                let mut ack = [0u8; 1];
                raw.read_exact(&mut ack).await.unwrap();
                raw.write_all(format!("\x01scp: {path}: No such file or directory\n").as_bytes())
                    .await
                    .unwrap();
                raw.shutdown().await.unwrap();
                1
            }
        } else {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .output()
                .await
                .unwrap();
            if !output.stdout.is_empty() {
                assert!(handle.data(id, CryptoVec::from(output.stdout)).await.is_ok());
            }
            if !output.stderr.is_empty() {
                assert!(
                    handle
                        .extended_data(id, 1, CryptoVec::from(output.stderr))
                        .await
                        .is_ok()
                );
            }
            let code = u32::try_from(output.status.code().unwrap_or(1)).unwrap_or(1);
            handle.exit_status_request(id, code).await.unwrap();
            handle.eof(id).await.unwrap();
            handle.close(id).await.unwrap();
            return;
        };

        handle.exit_status_request(id, status).await.unwrap();
        handle.close(id).await.unwrap();
    }

    /// Start the fake sshd on an ephemeral port
    async fn start_sshd() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Arc::new(server::Config {
            keys: vec![PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap()],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            inactivity_timeout: None,
            ..Default::default()
        });

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let config = config.clone();
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, socket, FakeSshd).await {
                        let _ = session.await;
                    }
                });
            }
        });
        port
    }

    async fn connect_fixture(root: &Path) -> SshShell {
        let port = start_sshd().await;
        let config = SshConfig::new("fixture")
            .with_host("127.0.0.1", port)
            .with_username("tester")
            .with_password(PASSWORD)
            .with_root(root.to_string_lossy())
            .with_copy_timeout(SCP_TIMEOUT);
        SshShell::connect(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let result = SshShell::connect(SshConfig::new("box")).await;
        assert!(matches!(result, Err(ExecError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = SshConfig::new("box")
            .with_host("127.0.0.1", port)
            .with_password("pw");
        let result = SshShell::connect(config).await;
        assert!(matches!(result, Err(ExecError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_within_connect_timeout() {
        // TEST-NET-1, never routed
        let config = SshConfig::new("box")
            .with_host("192.0.2.1", 22)
            .with_password("pw")
            .with_connect_timeout(Duration::from_secs(1));

        let start = Instant::now();
        let result = SshShell::connect(config).await;

        assert!(matches!(result, Err(ExecError::ConnectionFailed(_))));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_silent_server_hits_banner_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let config = SshConfig::new("box")
            .with_host("127.0.0.1", port)
            .with_password("pw")
            .with_banner_timeout(Duration::from_secs(1));

        let start = Instant::now();
        let result = SshShell::connect(config).await;

        assert!(
            matches!(result, Err(ExecError::ConnectionFailed(ref m)) if m.contains("banner"))
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_over_ssh() {
        let root = tempfile::tempdir().unwrap();
        let shell = connect_fixture(root.path()).await;
        assert!(shell.is_connected());

        let result = shell.exec("echo X", ".", false).await.unwrap();
        assert_eq!(result.output, "X\n");
        assert_eq!(result.status, 0);

        std::fs::create_dir(root.path().join("sub")).unwrap();
        let pwd = shell.exec("pwd", "sub", false).await.unwrap();
        assert!(pwd.output.trim().ends_with("/sub"), "{}", pwd.output);

        let ignored = shell.exec("echo oops >&2; exit 3", ".", true).await.unwrap();
        assert_eq!(ignored.status, 3);
        assert_eq!(ignored.output.trim(), "oops");

        let raised = shell.exec("exit 3", ".", false).await;
        assert!(matches!(raised, Err(ExecError::CommandFailed { status: 3, .. })));

        let missing = shell.exec("echo should-not-run", "missing", true).await.unwrap();
        assert_ne!(missing.status, 0);
        assert!(!missing.output.contains("should-not-run"));
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let port = start_sshd().await;
        let config = SshConfig::new("fixture")
            .with_host("127.0.0.1", port)
            .with_password("wrong");

        let result = SshShell::connect(config).await;
        assert!(matches!(result, Err(ExecError::AuthenticationFailed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_and_pull_over_scp() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let shell = connect_fixture(root.path()).await;

        let file = work.path().join("test_file.txt");
        std::fs::write(&file, "Test content").unwrap();
        shell.send(&file, "dest_folder").await;
        std::fs::write(&file, "Test content v2").unwrap();
        shell.send(&file, "dest_folder").await;
        assert_eq!(
            std::fs::read_to_string(root.path().join("dest_folder/test_file.txt")).unwrap(),
            "Test content v2"
        );

        let folder = work.path().join("test_folder");
        std::fs::create_dir_all(folder.join("inner")).unwrap();
        std::fs::write(folder.join("inner/more.txt"), "more").unwrap();
        shell.send(&folder, "dest_folder").await;

        let pull_dest = work.path().join("pull_dest");
        shell.pull(&pull_dest, "dest_folder/test_file.txt").await;
        shell.pull(&pull_dest, "dest_folder/test_folder").await;

        assert_eq!(
            std::fs::read_to_string(pull_dest.join("test_file.txt")).unwrap(),
            "Test content v2"
        );
        assert_eq!(
            std::fs::read_to_string(pull_dest.join("test_folder/inner/more.txt")).unwrap(),
            "more"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pull_of_missing_remote_path_fails() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let shell = connect_fixture(root.path()).await;

        let err = shell
            .download("/definitely/missing/file", work.path())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExecError::TransferFailed(ref m) if m.contains("No such file or directory"))
        );

        // the public operation only logs it
        shell.pull(work.path(), "/definitely/missing/file").await;
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_is_final() {
        let root = tempfile::tempdir().unwrap();
        let shell = connect_fixture(root.path()).await;

        shell.close().await.unwrap();
        shell.close().await.unwrap();
        assert!(!shell.is_connected());

        let raised = shell.exec("echo X", ".", false).await;
        assert!(matches!(raised, Err(ExecError::NotConnected)));

        let ignored = shell.exec("echo X", ".", true).await.unwrap();
        assert_eq!(ignored.status, -1);
    }
}
