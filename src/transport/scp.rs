//! Remote copy over the scp protocol.
//!
//! The remote side runs `scp -t` (sink, for uploads) or `scp -f` (source,
//! for downloads); this module builds that command line and drives the
//! local half of the protocol over the command's standard streams.

use super::{Client, RemoteCommand};
use crate::core::error::{Error, Result, ResultExt};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

pub struct ScpConfig {
    /// Remote login user, used in progress output
    pub user: String,
    /// Path on the remote host
    pub remote_location: String,
    /// Local paths: the sources of an upload, or the single destination of
    /// a download
    pub targets: Vec<PathBuf>,
    /// Copy directories (`-r`)
    pub recursive: bool,
    /// Receives one line per transferred file
    pub progress: Box<dyn Write + Send>,
}

impl fmt::Debug for ScpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScpConfig")
            .field("user", &self.user)
            .field("remote_location", &self.remote_location)
            .field("targets", &self.targets)
            .field("recursive", &self.recursive)
            .finish()
    }
}

#[derive(Debug)]
pub struct ScpCommand {
    direction: Direction,
    config: ScpConfig,
}

impl ScpCommand {
    pub fn upload(config: ScpConfig) -> Result<Self> {
        if config.targets.is_empty() {
            return Err(Error::bad_parameter("scp upload needs at least one source"));
        }
        Self::new(Direction::Upload, config)
    }

    pub fn download(config: ScpConfig) -> Result<Self> {
        if config.targets.len() != 1 {
            return Err(Error::bad_parameter(format!(
                "scp download needs exactly one destination, got {}",
                config.targets.len()
            )));
        }
        Self::new(Direction::Download, config)
    }

    fn new(direction: Direction, config: ScpConfig) -> Result<Self> {
        if config.remote_location.is_empty() {
            return Err(Error::bad_parameter("missing remote location"));
        }
        Ok(Self { direction, config })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The command the remote shell runs to serve the other half.
    pub fn remote_shell_cmd(&self) -> String {
        let mut cmd = String::from("scp");
        cmd.push_str(match self.direction {
            Direction::Upload => " -t",
            Direction::Download => " -f",
        });
        if self.config.recursive {
            cmd.push_str(" -r");
        }
        if self.direction == Direction::Upload && self.config.targets.len() > 1 {
            cmd.push_str(" -d");
        }
        cmd.push_str(" -- ");
        cmd.push_str(&shell_words::quote(&self.config.remote_location));
        cmd
    }

    /// Run the local half of the protocol against the remote command's
    /// stdout (`reader`) and stdin (`writer`).
    pub async fn execute<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(reader);
        match self.direction {
            Direction::Upload => self.send(&mut reader, &mut writer).await,
            Direction::Download => self.receive(&mut reader, &mut writer).await,
        }
    }

    async fn send<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        enum Walk {
            Enter(PathBuf),
            File(PathBuf),
            Leave,
        }

        read_ack(reader).await?;

        let mut stack = Vec::new();
        for target in self.config.targets.iter().rev() {
            let meta = tokio::fs::metadata(target)
                .await
                .with_context(|| format!("can not read {}", target.display()))?;
            if meta.is_dir() {
                if !self.config.recursive {
                    return Err(Error::bad_parameter(format!(
                        "{} is a directory, use recursive mode",
                        target.display()
                    )));
                }
                stack.push(Walk::Enter(target.clone()));
            } else {
                stack.push(Walk::File(target.clone()));
            }
        }

        while let Some(step) = stack.pop() {
            match step {
                Walk::File(path) => self.send_file(reader, writer, &path).await?,
                Walk::Enter(dir) => {
                    let mode = file_mode(&tokio::fs::metadata(&dir).await?, 0o755);
                    let line = format!("D{:04o} 0 {}\n", mode, file_name(&dir)?);
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await?;
                    read_ack(reader).await?;
                    writeln!(self.config.progress, "{}/", dir.display())?;

                    let mut entries = Vec::new();
                    let mut dir_entries = tokio::fs::read_dir(&dir).await?;
                    while let Some(entry) = dir_entries.next_entry().await? {
                        let is_dir = entry.file_type().await?.is_dir();
                        entries.push((entry.path(), is_dir));
                    }
                    entries.sort();

                    stack.push(Walk::Leave);
                    for (path, is_dir) in entries.into_iter().rev() {
                        stack.push(if is_dir { Walk::Enter(path) } else { Walk::File(path) });
                    }
                }
                Walk::Leave => {
                    writer.write_all(b"E\n").await?;
                    writer.flush().await?;
                    read_ack(reader).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_file<R, W>(&mut self, reader: &mut R, writer: &mut W, path: &Path) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("can not open {}", path.display()))?;
        let meta = file.metadata().await?;
        let size = meta.len();
        let line = format!("C{:04o} {} {}\n", file_mode(&meta, 0o644), size, file_name(path)?);
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        read_ack(reader).await?;

        let sent = tokio::io::copy(&mut file.take(size), writer).await?;
        if sent != size {
            return Err(Error::bad_parameter(format!(
                "{} changed size during transfer",
                path.display()
            )));
        }
        writer.write_all(&[0]).await?;
        writer.flush().await?;
        read_ack(reader).await?;
        writeln!(
            self.config.progress,
            "{} -> {}@{} ({} bytes)",
            path.display(),
            self.config.user,
            self.config.remote_location,
            size
        )?;
        Ok(())
    }

    async fn receive<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let root = self.config.targets[0].clone();
        let mut dirs: Vec<PathBuf> = Vec::new();
        ack(writer).await?;

        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return if dirs.is_empty() { Ok(()) } else { Err(Error::Eof) };
            }
            let Some((&tag, rest)) = line.split_first() else {
                continue;
            };
            let rest = String::from_utf8_lossy(rest).trim_end_matches('\n').to_string();

            match tag {
                b'C' => {
                    let (mode, size, name) = parse_entry(&rest)?;
                    let path = entry_path(&root, &dirs, &name).await;
                    ack(writer).await?;

                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("can not create {}", path.display()))?;
                    let got = tokio::io::copy(&mut (&mut *reader).take(size), &mut file).await?;
                    if got != size {
                        return Err(Error::Eof);
                    }
                    file.flush().await?;
                    set_mode(&path, mode).await?;
                    read_ack(reader).await?;
                    ack(writer).await?;
                    writeln!(
                        self.config.progress,
                        "{}@{} -> {} ({} bytes)",
                        self.config.user,
                        self.config.remote_location,
                        path.display(),
                        size
                    )?;
                }
                b'D' => {
                    let (mode, _, name) = parse_entry(&rest)?;
                    let path = entry_path(&root, &dirs, &name).await;
                    tokio::fs::create_dir_all(&path).await?;
                    set_mode(&path, mode).await?;
                    dirs.push(path);
                    ack(writer).await?;
                }
                b'E' => {
                    if dirs.pop().is_none() {
                        return Err(Error::bad_parameter("scp: unbalanced end of directory"));
                    }
                    ack(writer).await?;
                }
                b'T' => ack(writer).await?,
                1 | 2 => return Err(remote_error(tag, &rest)),
                other => {
                    return Err(Error::bad_parameter(format!(
                        "scp: unexpected message type {:#04x}",
                        other
                    )))
                }
            }
        }
    }
}

/// Start `cmd`'s remote half on `client` and drive the local half.
///
/// A protocol error that is only an end-of-stream is not a failure when
/// the remote command itself exited cleanly.
pub async fn execute_scp(client: &dyn Client, cmd: &mut ScpCommand) -> Result<()> {
    let shell = cmd.remote_shell_cmd();
    let RemoteCommand { mut stdin, stdout, wait } = client.start(&shell).await?;

    let protocol = async {
        let res = cmd.execute(stdout, &mut stdin).await;
        if let Err(ref e) = res {
            debug!(host = %client.addr(), error = %e, "scp protocol stopped");
        }
        // The remote end may already have exited; its status says how.
        let _ = stdin.shutdown().await;
        res
    };
    let (proto_res, run_res) = tokio::join!(protocol, wait);
    let run_res = run_res.and_then(|exit| exit.into_result(&shell));

    let err = match (proto_res, run_res) {
        (Ok(()), Ok(())) => return Ok(()),
        (Ok(()), Err(run_err)) => run_err,
        (Err(proto_err), Err(run_err)) if proto_err.is_eof() => run_err,
        (Err(proto_err), _) => proto_err,
    };
    if err.is_eof() {
        return Ok(());
    }
    Err(err)
}

async fn ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[0]).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_ack<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut byte = [0u8; 1];
    if reader.read(&mut byte).await? == 0 {
        return Err(Error::Eof);
    }
    match byte[0] {
        0 => Ok(()),
        code @ (1 | 2) => {
            let mut msg = String::new();
            reader.read_line(&mut msg).await?;
            Err(remote_error(code, msg.trim_end()))
        }
        other => Err(Error::bad_parameter(format!(
            "scp: unexpected response byte {:#04x}",
            other
        ))),
    }
}

fn remote_error(code: u8, msg: &str) -> Error {
    Error::Remote {
        command: "scp".to_string(),
        status: i32::from(code),
        stderr: msg.trim().to_string(),
    }
}

/// Parse `0644 1234 name` from a `C` or `D` line.
fn parse_entry(rest: &str) -> Result<(u32, u64, String)> {
    let mut parts = rest.splitn(3, ' ');
    let (Some(mode), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::bad_parameter(format!("scp: malformed entry {:?}", rest)));
    };
    let mode = u32::from_str_radix(mode, 8)
        .map_err(|_| Error::bad_parameter(format!("scp: invalid mode {:?}", mode)))?;
    let size = size
        .parse()
        .map_err(|_| Error::bad_parameter(format!("scp: invalid size {:?}", size)))?;
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::bad_parameter(format!("scp: invalid file name {:?}", name)));
    }
    Ok((mode, size, name.to_string()))
}

async fn entry_path(root: &Path, dirs: &[PathBuf], name: &str) -> PathBuf {
    match dirs.last() {
        Some(dir) => dir.join(name),
        None if tokio::fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false) => root.join(name),
        None => root.to_path_buf(),
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::bad_parameter(format!("{} has no file name", path.display())))
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata, default: u32) -> u32 {
    default
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::transport::testing::{FakeClient, Request};
    use crate::transport::CommandExit;
    use tokio::io::DuplexStream;

    fn config(remote: &str, targets: Vec<PathBuf>, recursive: bool) -> ScpConfig {
        ScpConfig {
            user: "deploy".to_string(),
            remote_location: remote.to_string(),
            targets,
            recursive,
            progress: Box::new(std::io::sink()),
        }
    }

    async fn read_line(r: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> String {
        let mut line = String::new();
        r.read_line(&mut line).await.unwrap();
        line
    }

    async fn read_exact(r: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        r.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[test]
    fn test_remote_shell_cmd() {
        let up = ScpCommand::upload(config("/tmp/my dir", vec!["a".into()], false)).unwrap();
        assert_eq!(up.remote_shell_cmd(), "scp -t -- '/tmp/my dir'");
        let many = ScpCommand::upload(config("/srv", vec!["a".into(), "b".into()], true)).unwrap();
        assert_eq!(many.remote_shell_cmd(), "scp -t -r -d -- /srv");
        let down = ScpCommand::download(config("/var/log", vec!["out".into()], true)).unwrap();
        assert_eq!(down.remote_shell_cmd(), "scp -f -r -- /var/log");
        assert_eq!(down.direction(), Direction::Download);
    }

    #[test]
    fn test_command_validation() {
        assert!(ScpCommand::upload(config("/tmp", vec![], false)).is_err());
        assert!(ScpCommand::upload(config("", vec!["a".into()], false)).is_err());
        assert!(ScpCommand::download(config("/tmp", vec!["a".into(), "b".into()], false)).is_err());
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(parse_entry("0644 12 app.conf").unwrap(), (0o644, 12, "app.conf".to_string()));
        assert_eq!(parse_entry("0755 0 with space").unwrap().2, "with space");
        assert!(parse_entry("0644 12").is_err());
        assert!(parse_entry("0999 1 x").is_err());
        assert!(parse_entry("0644 1 ../etc/passwd").is_err());
        assert!(parse_entry("0644 1 ..").is_err());
    }

    #[tokio::test]
    async fn test_upload_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "hello").unwrap();
        let mut cmd = ScpCommand::upload(config("/tmp/a.txt", vec![src], false)).unwrap();

        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (their_r, mut their_w) = tokio::io::split(theirs);

        let peer = async move {
            let mut r = BufReader::new(their_r);
            their_w.write_all(&[0]).await.unwrap();
            let header = read_line(&mut r).await;
            their_w.write_all(&[0]).await.unwrap();
            let body = read_exact(&mut r, 6).await;
            their_w.write_all(&[0]).await.unwrap();
            (header, body)
        };
        let (res, (header, body)) = tokio::join!(cmd.execute(our_r, our_w), peer);
        res.unwrap();
        assert!(header.starts_with('C'));
        assert!(header.ends_with(" 5 a.txt\n"));
        assert_eq!(body, b"hello\0");
    }

    #[tokio::test]
    async fn test_upload_directory_requires_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = ScpCommand::upload(config("/tmp", vec![dir.path().to_path_buf()], false)).unwrap();
        let (ours, theirs) = tokio::io::duplex(64);
        let (our_r, our_w) = tokio::io::split(ours);
        let (_their_r, mut their_w) = tokio::io::split(theirs);
        their_w.write_all(&[0]).await.unwrap();
        let err = cmd.execute(our_r, our_w).await.unwrap_err();
        assert!(err.to_string().contains("use recursive mode"));
    }

    #[tokio::test]
    async fn test_upload_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("index.html"), "hi").unwrap();
        let mut cmd = ScpCommand::upload(config("/srv", vec![root], true)).unwrap();

        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (their_r, mut their_w) = tokio::io::split(theirs);

        let peer = async move {
            let mut r = BufReader::new(their_r);
            let mut seen = Vec::new();
            their_w.write_all(&[0]).await.unwrap();
            seen.push(read_line(&mut r).await);
            their_w.write_all(&[0]).await.unwrap();
            seen.push(read_line(&mut r).await);
            their_w.write_all(&[0]).await.unwrap();
            read_exact(&mut r, 3).await;
            their_w.write_all(&[0]).await.unwrap();
            seen.push(read_line(&mut r).await);
            their_w.write_all(&[0]).await.unwrap();
            seen
        };
        let (res, seen) = tokio::join!(cmd.execute(our_r, our_w), peer);
        res.unwrap();
        assert!(seen[0].starts_with('D') && seen[0].ends_with(" 0 site\n"));
        assert!(seen[1].ends_with(" 2 index.html\n"));
        assert_eq!(seen[2], "E\n");
    }

    #[tokio::test]
    async fn test_upload_remote_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let mut cmd = ScpCommand::upload(config("/root/x", vec![src], false)).unwrap();

        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (_their_r, mut their_w) = tokio::io::split(theirs);
        their_w.write_all(b"\x01scp: /root/x: Permission denied\n").await.unwrap();

        let err = cmd.execute(our_r, our_w).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(err.to_string().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_download_file_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd =
            ScpCommand::download(config("/etc/b.txt", vec![dir.path().to_path_buf()], false)).unwrap();

        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (their_r, mut their_w) = tokio::io::split(theirs);

        let peer = async move {
            let mut r = BufReader::new(their_r);
            assert_eq!(read_exact(&mut r, 1).await, [0]);
            their_w.write_all(b"C0600 5 b.txt\n").await.unwrap();
            assert_eq!(read_exact(&mut r, 1).await, [0]);
            their_w.write_all(b"hello\0").await.unwrap();
            assert_eq!(read_exact(&mut r, 1).await, [0]);
        };
        let (res, ()) = tokio::join!(cmd.execute(our_r, our_w), peer);
        res.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("b.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_download_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd =
            ScpCommand::download(config("/var/www", vec![dir.path().to_path_buf()], true)).unwrap();

        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (their_r, mut their_w) = tokio::io::split(theirs);

        let peer = async move {
            let mut r = BufReader::new(their_r);
            read_exact(&mut r, 1).await;
            their_w.write_all(b"T1700000000 0 1700000000 0\n").await.unwrap();
            read_exact(&mut r, 1).await;
            their_w.write_all(b"D0755 0 www\n").await.unwrap();
            read_exact(&mut r, 1).await;
            their_w.write_all(b"C0644 3 x.txt\n").await.unwrap();
            read_exact(&mut r, 1).await;
            their_w.write_all(b"abc\0").await.unwrap();
            read_exact(&mut r, 1).await;
            their_w.write_all(b"E\n").await.unwrap();
            read_exact(&mut r, 1).await;
        };
        let (res, ()) = tokio::join!(cmd.execute(our_r, our_w), peer);
        res.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("www/x.txt")).unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_download_truncated_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd =
            ScpCommand::download(config("/etc/b.txt", vec![dir.path().join("b")], false)).unwrap();

        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (their_r, mut their_w) = tokio::io::split(theirs);

        let peer = async move {
            let mut r = BufReader::new(their_r);
            read_exact(&mut r, 1).await;
            their_w.write_all(b"C0644 10 b\n").await.unwrap();
            read_exact(&mut r, 1).await;
            their_w.write_all(b"abc").await.unwrap();
        };
        let (res, ()) = tokio::join!(cmd.execute(our_r, our_w), peer);
        assert!(res.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_download_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd =
            ScpCommand::download(config("/nope", vec![dir.path().to_path_buf()], false)).unwrap();
        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_r, our_w) = tokio::io::split(ours);
        let (_their_r, mut their_w) = tokio::io::split(theirs);
        their_w.write_all(b"\x02scp: /nope: No such file or directory\n").await.unwrap();
        let err = cmd.execute(our_r, our_w).await.unwrap_err();
        assert!(err.to_string().contains("No such file"));
    }

    fn responder_exit(status: i32) -> impl Fn(Request) -> futures::future::BoxFuture<'static, CommandExit> {
        move |req: Request| {
            Box::pin(async move {
                drop(req.stream);
                CommandExit { status, stderr: "boom".to_string() }
            })
        }
    }

    #[tokio::test]
    async fn test_execute_scp_clean_eof_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let client = FakeClient::new("h1", responder_exit(0));
        let mut cmd = ScpCommand::upload(config("/tmp/a.txt", vec![src], false)).unwrap();
        execute_scp(&client, &mut cmd).await.unwrap();
        assert_eq!(client.commands(), vec!["scp -t -- /tmp/a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_scp_eof_with_failed_command_reports_command() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let client = FakeClient::new("h1", responder_exit(1));
        let mut cmd = ScpCommand::upload(config("/tmp/a.txt", vec![src], false)).unwrap();
        let err = execute_scp(&client, &mut cmd).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_execute_scp_protocol_error_wins() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let client = FakeClient::new("h1", |req: Request| -> futures::future::BoxFuture<'static, CommandExit> {
            Box::pin(async move {
                let mut stream = req.stream;
                let _ = stream.write_all(b"\x02denied\n").await;
                CommandExit { status: 1, stderr: "exit".to_string() }
            })
        });
        let mut cmd = ScpCommand::upload(config("/tmp/a.txt", vec![src], false)).unwrap();
        let err = execute_scp(&client, &mut cmd).await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }
}
