//! FTP protocol engine.
//!
//! A per-connection command loop over a CRLF-terminated textual line
//! protocol, with an independently negotiated data channel per transfer.
//! Written against cr.yp.to/ftp.html and the usual raw-command references;
//! mountable with curlftpfs:
//!
//! ```bash
//! $ mkdir mnt
//! $ curlftpfs -o umask=0000,uid=1000,gid=1000,allow_other localhost:2121 mnt
//! ```
//!
//! Authentication is accept-any (anonymous only). Every session runs
//! against a [`PolicyView`] of the shared namespace; a restrictive policy
//! turns uploads into no-ops without the engine noticing.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;

use canopy_vfs::{MemoryNode, Node, Passthrough, PolicyView, SecurityPolicy, SEPARATOR};

use crate::constants::CONNECTION_LIMIT;

/// FTP server over a virtual filesystem root.
pub struct FtpServer {
    listener: TcpListener,
    view: PolicyView,
    limit: usize,
}

impl FtpServer {
    /// Bind with the pass-through policy.
    pub async fn bind(addr: impl ToSocketAddrs, root: Node) -> io::Result<Self> {
        Self::bind_with_policy(addr, root, Arc::new(Passthrough)).await
    }

    /// Bind with an explicit security policy.
    pub async fn bind_with_policy(
        addr: impl ToSocketAddrs,
        root: Node,
        policy: Arc<dyn SecurityPolicy>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            view: PolicyView::new(root, policy),
            limit: CONNECTION_LIMIT,
        })
    }

    /// Bound the number of concurrently served connections.
    pub fn connection_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// The bound control-socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever. One task owns one connection for its
    /// whole lifetime; the semaphore bounds how many run at once. A failed
    /// session never affects any other.
    pub async fn run(self) -> io::Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "FTP server listening");
        let connections = Arc::new(Semaphore::new(self.limit));
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(%err, "accept failed");
                    continue;
                }
            };
            let permit = connections.clone().acquire_owned().await.ok();
            let view = self.view.clone();
            tokio::spawn(async move {
                let _permit = permit;
                tracing::debug!(%peer, "client connected");
                if let Err(err) = Session::new(view).run(socket).await {
                    tracing::debug!(%peer, %err, "session ended with error");
                }
                tracing::debug!(%peer, "client closed");
            });
        }
    }
}

/// Pending data-channel state, independent of the control connection.
enum DataChannel {
    None,
    /// PORT/EPRT connected out to the client; the stream waits for the
    /// next transfer.
    Active(TcpStream),
    /// PASV/EPSV listener awaiting the client's connection.
    Passive(TcpListener),
}

/// Per-connection, ephemeral session state.
struct Session {
    view: PolicyView,
    cwd: String,
    data: DataChannel,
    resume: u64,
}

impl Session {
    fn new(view: PolicyView) -> Self {
        Self {
            view,
            cwd: SEPARATOR.to_owned(),
            data: DataChannel::None,
            resume: 0,
        }
    }

    async fn run(mut self, socket: TcpStream) -> io::Result<()> {
        let local_ip = socket.local_addr()?.ip();
        let (read_half, mut writer) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        reply(&mut writer, "220 Welcome").await?;

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let cmd = line.trim_end_matches(['\r', '\n']);
            if cmd.is_empty() {
                continue;
            }
            tracing::trace!("<<< {cmd}");
            let (verb, arg) = match cmd.split_once(' ') {
                Some((verb, arg)) => (verb, arg.trim()),
                None => (cmd, ""),
            };

            match verb.to_ascii_uppercase().as_str() {
                // A misdirected HTTP client.
                "GET" => {
                    reply(&mut writer, "This is an FTP server.").await?;
                    break;
                }
                // Any USER/PASS pair is accepted; anonymous only.
                "USER" => {
                    tracing::debug!(user = arg, "login");
                    reply(&mut writer, "331 Please specify the password.").await?;
                }
                "PASS" => reply(&mut writer, "230 Login successful.").await?,
                "SYST" => reply(&mut writer, "215 UNIX Type: L8").await?,
                "PWD" => reply(&mut writer, &format!("257 \"{}\"", self.cwd)).await?,
                "TYPE" => {
                    let text = match arg.to_ascii_uppercase().as_str() {
                        "I" => "200 Switching to Binary mode.",
                        "A" => "200 Switching to ASCII mode.",
                        _ => "504 Bad TYPE command.",
                    };
                    reply(&mut writer, text).await?;
                }
                "MODE" => {
                    let mode = arg.to_ascii_uppercase();
                    if matches!(mode.as_str(), "S" | "B" | "C") {
                        reply(&mut writer, &format!("200 Mode set to {mode}.")).await?;
                    } else {
                        reply(&mut writer, "504 Bad MODE command.").await?;
                    }
                }
                "PORT" => {
                    let addr = parse_port(arg)?;
                    let stream = TcpStream::connect(addr).await?;
                    tracing::info!(%addr, "data receiver connected");
                    self.data = DataChannel::Active(stream);
                    reply(&mut writer, "200 PORT command successful.").await?;
                }
                "EPRT" => {
                    let addr = parse_eprt(arg)?;
                    let stream = TcpStream::connect(addr).await?;
                    tracing::info!(%addr, "data receiver connected");
                    self.data = DataChannel::Active(stream);
                    reply(&mut writer, "200 PORT command successful.").await?;
                }
                "PASV" => {
                    // Replacing the channel drops any previous passive
                    // listener: latest wins.
                    let listener = TcpListener::bind((local_ip, 0)).await?;
                    let port = listener.local_addr()?.port();
                    let octets = match local_ip {
                        IpAddr::V4(v4) => v4.octets(),
                        IpAddr::V6(_) => Ipv4Addr::LOCALHOST.octets(),
                    };
                    self.data = DataChannel::Passive(listener);
                    reply(
                        &mut writer,
                        &format!(
                            "227 Entering Passive Mode ({},{},{},{},{},{}).",
                            octets[0],
                            octets[1],
                            octets[2],
                            octets[3],
                            port / 256,
                            port % 256
                        ),
                    )
                    .await?;
                }
                "EPSV" => {
                    let listener = TcpListener::bind((local_ip, 0)).await?;
                    let port = listener.local_addr()?.port();
                    self.data = DataChannel::Passive(listener);
                    reply(
                        &mut writer,
                        &format!("229 Entering Extended Passive Mode (|||{port}|)."),
                    )
                    .await?;
                }
                "SIZE" => match self.view.query(&self.resolve(arg)) {
                    Some(file) if !file.is_dir() => {
                        reply(&mut writer, &format!("213 {}", file.len())).await?;
                    }
                    _ => reply(&mut writer, "550 Could not get file size.").await?,
                },
                "MDTM" => match self.view.query(&self.resolve(arg)) {
                    Some(file) => {
                        let stamp: DateTime<Local> = file.modified().into();
                        reply(&mut writer, &format!("200 {}", stamp.format("%Y%m%d%H%M%S")))
                            .await?;
                    }
                    None => reply(&mut writer, "550 Failed to get modification time.").await?,
                },
                "CWD" | "CDUP" => {
                    tracing::debug!(from = %self.cwd, "changing directory");
                    let target = if verb.eq_ignore_ascii_case("CDUP") {
                        canonicalize(&format!("{}{}..", self.cwd, SEPARATOR))
                    } else {
                        self.resolve(arg)
                    };
                    match self.view.query(&target) {
                        Some(dir) if dir.is_dir() => {
                            reply(&mut writer, "250 Directory successfully changed.").await?;
                            self.cwd = target;
                        }
                        _ => reply(&mut writer, "550 Failed to change directory.").await?,
                    }
                }
                "LIST" => {
                    reply(&mut writer, "150 Here comes the directory listing.").await?;
                    let Some(mut data) = self.take_data().await? else {
                        reply(&mut writer, "425 Use PORT or PASV first.").await?;
                        continue;
                    };
                    for line in self.render_listing().await {
                        let _ = data.write_all(line.as_bytes()).await;
                        let _ = data.write_all(b"\r\n").await;
                    }
                    let _ = data.shutdown().await;
                    reply(&mut writer, "226 Directory send OK.").await?;
                }
                "REST" => {
                    let skip: u64 = arg.parse().map_err(|_| invalid("bad REST offset"))?;
                    self.resume = skip;
                    reply(&mut writer, &format!("350 Skipped {skip} bytes")).await?;
                }
                "RETR" => {
                    // The stored offset applies to exactly one transfer.
                    let skip = std::mem::take(&mut self.resume);
                    let target = self.resolve(arg);
                    match self.view.query(&target) {
                        Some(file) if !file.is_dir() => {
                            reply(
                                &mut writer,
                                "150 Opening BINARY mode data connection for file",
                            )
                            .await?;
                            let Some(mut data) = self.take_data().await? else {
                                reply(&mut writer, "425 Use PORT or PASV first.").await?;
                                continue;
                            };
                            match send_file(&file, skip, &mut data).await {
                                Ok(()) => {
                                    let _ = data.shutdown().await;
                                    reply(&mut writer, "226 File sent").await?;
                                }
                                Err(err) => {
                                    // A reset peer aborts only this
                                    // transfer; the session ends quietly.
                                    if !matches!(
                                        err.kind(),
                                        io::ErrorKind::ConnectionReset
                                            | io::ErrorKind::BrokenPipe
                                    ) {
                                        tracing::error!(path = %target, %err, "error serving file");
                                    }
                                    break;
                                }
                            }
                        }
                        _ => reply(&mut writer, "550 Failed to open file.").await?,
                    }
                }
                "DELE" => reply(&mut writer, "550 Permission denied.").await?,
                "FEAT" => {
                    reply(&mut writer, "211-Features:").await?;
                    reply(&mut writer, " MDTM").await?;
                    reply(&mut writer, " PASV").await?;
                    reply(&mut writer, "211 end").await?;
                }
                "HELP" => {
                    reply(&mut writer, "214-Commands supported:").await?;
                    reply(&mut writer, "MDTM PASV").await?;
                    reply(&mut writer, "214 End").await?;
                }
                "SITE" => reply(&mut writer, "200 Nothing to see here").await?,
                "RNFR" => {
                    reply(&mut writer, "350 Okay").await?;
                    // Rename is acknowledged but never applied.
                    let mut rnto = String::new();
                    if reader.read_line(&mut rnto).await? == 0 {
                        break;
                    }
                    reply(&mut writer, "250 Renamed").await?;
                }
                "MKD" => {
                    let target = self.resolve(arg);
                    if matches!(self.view.query(&target), Some(f) if f.is_dir()) {
                        reply(&mut writer, "550 Failed to create directory. (it exists)")
                            .await?;
                    } else {
                        let (dir_part, name) =
                            target.rsplit_once(SEPARATOR).unwrap_or(("", target.as_str()));
                        let parent_path = if dir_part.is_empty() { SEPARATOR } else { dir_part };
                        match self.view.query(parent_path) {
                            Some(parent) if parent.is_dir() && !name.is_empty() => {
                                parent.add(MemoryNode::dir(name));
                                reply(&mut writer, "200 created directory.").await?;
                            }
                            _ => reply(&mut writer, "550 Failed to create directory.").await?,
                        }
                    }
                }
                "STOR" => {
                    let name = arg.to_owned();
                    reply(&mut writer, "150 Entering Transfer Mode").await?;
                    let Some(data) = self.take_data().await? else {
                        reply(&mut writer, "425 Use PORT or PASV first.").await?;
                        continue;
                    };
                    let text = read_upload(data).await?;
                    let node = MemoryNode::file(name, text);
                    match self.view.query(&self.cwd) {
                        Some(dir) => {
                            dir.add(node.clone());
                            self.view.notify_modified(&node);
                            reply(&mut writer, "226 File uploaded successfully").await?;
                        }
                        None => reply(&mut writer, "550 Failed to store file.").await?,
                    }
                }
                "QUIT" => {
                    reply(&mut writer, "221 Goodbye").await?;
                    break;
                }
                "NOOP" => reply(&mut writer, "200 NOOP ok.").await?,
                "OPTS" => {
                    let payload = arg.to_ascii_uppercase();
                    let mut parts = payload.split_whitespace();
                    let (opt, status) = parts
                        .next()
                        .zip(parts.next())
                        .ok_or_else(|| invalid("bad OPTS arguments"))?;
                    reply(&mut writer, &format!("200 {opt} always {status}.")).await?;
                }
                _ => {
                    tracing::warn!(cmd, "unsupported operation");
                    reply(&mut writer, &format!("502 {verb} not implemented.")).await?;
                }
            }
        }
        Ok(())
    }

    /// Canonicalize a command operand against the session's cwd.
    fn resolve(&self, input: &str) -> String {
        if input.starts_with(SEPARATOR) {
            canonicalize(input)
        } else {
            canonicalize(&format!("{}{}{}", self.cwd, SEPARATOR, input))
        }
    }

    /// Hand out the data connection for one transfer, resetting the
    /// pending state.
    async fn take_data(&mut self) -> io::Result<Option<TcpStream>> {
        match std::mem::replace(&mut self.data, DataChannel::None) {
            DataChannel::None => Ok(None),
            DataChannel::Active(stream) => Ok(Some(stream)),
            DataChannel::Passive(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Some(stream))
            }
        }
    }

    /// Render the cwd listing: sorted by name, each line formatted by an
    /// independent task, collected back in sorted order.
    async fn render_listing(&self) -> Vec<String> {
        let Some(dir) = self.view.query(&self.cwd) else {
            return Vec::new();
        };
        let mut entries = dir.list();
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        let tasks: Vec<_> = entries
            .into_iter()
            .map(|entry| tokio::spawn(async move { format_list_line(&entry) }))
            .collect();
        let mut lines = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(line) => lines.push(line),
                Err(err) => tracing::warn!(%err, "listing task failed"),
            }
        }
        lines
    }
}

/// Stream file content to the data connection, honoring a resume offset.
async fn send_file(file: &PolicyView, skip: u64, data: &mut TcpStream) -> io::Result<()> {
    let mut stream = file.open().await.map_err(io::Error::from)?;
    if skip > 0 {
        tokio::io::copy(&mut (&mut stream).take(skip), &mut tokio::io::sink()).await?;
    }
    tokio::io::copy(&mut stream, data).await?;
    Ok(())
}

/// Read newline-delimited text from the data connection until it closes,
/// reassembled with CRLF. Uploads are line-oriented text by design.
async fn read_upload(data: TcpStream) -> io::Result<String> {
    let mut reader = BufReader::new(data);
    let mut lines: Vec<String> = Vec::new();
    let mut buf = String::new();
    loop {
        buf.clear();
        if reader.read_line(&mut buf).await? == 0 {
            break;
        }
        let line = buf.trim_end_matches(['\r', '\n']);
        tracing::trace!("=== {line}");
        lines.push(line.to_owned());
    }
    Ok(lines.join("\r\n"))
}

/// `drwxr--r--` for directories (owner write+execute), `-r--r--r--`
/// otherwise; sizes twice at two widths, matching conventional `ls -l`.
fn format_list_line(file: &PolicyView) -> String {
    let perms = if file.is_dir() {
        "drwxr--r--"
    } else {
        "-r--r--r--"
    };
    let size = file.len();
    format!(
        "{perms} {size:>4} {owner:<8} {group:<8} {size:>8} {date} {name}",
        owner = file.owner(),
        group = file.group(),
        date = format_list_date(file.modified()),
        name = file.name(),
    )
}

fn format_list_date(modified: SystemTime) -> String {
    let modified: DateTime<Local> = modified.into();
    if modified.year() == Local::now().year() {
        modified.format("%b %-d %H:%M").to_string()
    } else {
        modified.format("%b %-d %Y").to_string()
    }
}

/// Normalize a slash-separated path: drop empty and `.` segments, let
/// `..` pop one segment without ever escaping the root.
fn canonicalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        SEPARATOR.to_owned()
    } else {
        format!("{SEPARATOR}{}", stack.join(SEPARATOR))
    }
}

/// `PORT h1,h2,h3,h4,p1,p2`
fn parse_port(arg: &str) -> io::Result<SocketAddr> {
    let parts: Vec<u8> = arg
        .split(',')
        .map(|s| s.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid("bad PORT arguments"))?;
    if parts.len() != 6 {
        return Err(invalid("bad PORT arguments"));
    }
    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = u16::from(parts[4]) * 256 + u16::from(parts[5]);
    Ok(SocketAddr::from((ip, port)))
}

/// `EPRT |proto|addr|port|` with an arbitrary delimiter character.
fn parse_eprt(arg: &str) -> io::Result<SocketAddr> {
    let delim = arg.chars().next().ok_or_else(|| invalid("empty EPRT"))?;
    let fields: Vec<&str> = arg[delim.len_utf8()..].split(delim).collect();
    if fields.len() < 3 {
        return Err(invalid("bad EPRT arguments"));
    }
    let ip: IpAddr = fields[1].parse().map_err(|_| invalid("bad EPRT address"))?;
    let port: u16 = fields[2].parse().map_err(|_| invalid("bad EPRT port"))?;
    Ok(SocketAddr::new(ip, port))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> io::Result<()> {
    tracing::trace!(">>> {text}");
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_collapses_segments() {
        assert_eq!(canonicalize("/a/./b/../c"), "/a/c");
        assert_eq!(canonicalize("/a//b/"), "/a/b");
        assert_eq!(canonicalize("/"), "/");
        assert_eq!(canonicalize(""), "/");
    }

    #[test]
    fn canonicalize_cannot_escape_root() {
        assert_eq!(canonicalize("/../../x"), "/x");
        assert_eq!(canonicalize("/a/../../../b"), "/b");
        assert_eq!(canonicalize("/.."), "/");
    }

    #[test]
    fn canonicalize_agrees_with_tree_query() {
        // The textual normalizer and the tree's own resolution must agree.
        let root = MemoryNode::dir("root");
        let a = MemoryNode::dir("a");
        a.add(MemoryNode::file("c.txt", "c"));
        root.add(a);

        let textual = canonicalize("/a/./b/../c.txt");
        assert!(
            root.query(&textual)
                .unwrap()
                .ptr_eq(&root.query("a/c.txt").unwrap())
        );
    }

    #[test]
    fn port_arguments() {
        let addr = parse_port("127,0,0,1,4,1").unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 1025)));
        assert!(parse_port("1,2,3").is_err());
        assert!(parse_port("a,b,c,d,e,f").is_err());
    }

    #[test]
    fn eprt_arguments() {
        let addr = parse_eprt("|1|132.235.1.2|6275|").unwrap();
        assert_eq!(addr, SocketAddr::from(([132, 235, 1, 2], 6275)));
        assert!(parse_eprt("").is_err());
        assert!(parse_eprt("|1|nonsense|x|").is_err());
    }

    #[test]
    fn listing_line_shape() {
        let file = MemoryNode::file("hello.txt", "hello");
        let line = format_list_line(&PolicyView::passthrough(file));

        assert!(line.starts_with("-r--r--r-- "));
        assert!(line.ends_with(" hello.txt"));
        // Both size columns carry the byte length.
        assert!(line.contains("    5 "));
        assert!(line.contains("       5 "));
    }

    #[test]
    fn listing_line_directory_permissions() {
        let dir = MemoryNode::dir("folder");
        dir.add(MemoryNode::file("x", "x"));
        let line = format_list_line(&PolicyView::passthrough(dir));

        assert!(line.starts_with("drwxr--r-- "));
        // Directory size is its child count.
        assert!(line.contains("    1 "));
        assert!(line.ends_with(" folder"));
    }
}
