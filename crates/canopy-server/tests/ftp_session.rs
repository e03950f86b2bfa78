//! End-to-end FTP session tests against an ephemeral server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use canopy_server::FtpServer;
use canopy_vfs::{MemoryNode, Node, ReadOnly};

/// Start a server on an ephemeral port and return its address.
async fn start_server(root: Node) -> SocketAddr {
    let server = FtpServer::bind("127.0.0.1:0", root).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect and consume the greeting.
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = socket.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        client.expect("220 Welcome").await;
        client
    }

    async fn send(&mut self, cmd: &str) {
        self.writer
            .write_all(format!("{cmd}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches(['\r', '\n']).to_owned()
    }

    async fn expect(&mut self, prefix: &str) -> String {
        let line = self.line().await;
        assert!(
            line.starts_with(prefix),
            "expected reply starting with {prefix:?}, got {line:?}"
        );
        line
    }

    /// Negotiate a passive data connection.
    async fn pasv(&mut self) -> TcpStream {
        self.send("PASV").await;
        let reply = self.expect("227 Entering Passive Mode (").await;
        TcpStream::connect(parse_pasv(&reply)).await.unwrap()
    }
}

fn parse_pasv(reply: &str) -> SocketAddr {
    let start = reply.find('(').unwrap() + 1;
    let end = reply.find(')').unwrap();
    let parts: Vec<u16> = reply[start..end]
        .split(',')
        .map(|s| s.parse().unwrap())
        .collect();
    SocketAddr::from((
        [
            parts[0] as u8,
            parts[1] as u8,
            parts[2] as u8,
            parts[3] as u8,
        ],
        parts[4] * 256 + parts[5],
    ))
}

async fn read_to_end(mut data: TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    data.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn login_store_retrieve_round_trip() {
    let addr = start_server(MemoryNode::dir("root")).await;
    let mut client = Client::connect(addr).await;

    client.send("USER a").await;
    client.expect("331 Please specify the password.").await;
    client.send("PASS a").await;
    client.expect("230 Login successful.").await;
    client.send("PWD").await;
    let pwd = client.line().await;
    assert_eq!(pwd, "257 \"/\"");

    // Upload over a passive data connection.
    let mut data = client.pasv().await;
    client.send("STOR test.txt").await;
    client.expect("150 Entering Transfer Mode").await;
    data.write_all(b"hello").await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    client.expect("226 File uploaded successfully").await;

    // Read back exactly the five bytes.
    let data = client.pasv().await;
    client.send("RETR test.txt").await;
    client
        .expect("150 Opening BINARY mode data connection for file")
        .await;
    assert_eq!(read_to_end(data).await, b"hello");
    client.expect("226 File sent").await;

    client.send("QUIT").await;
    client.expect("221 Goodbye").await;
}

#[tokio::test]
async fn list_output_is_sorted_by_name() {
    let root = MemoryNode::dir("root");
    // Insertion order deliberately unsorted.
    root.add(MemoryNode::file("b.txt", "b"));
    root.add(MemoryNode::file("a.txt", "a"));
    root.add(MemoryNode::file("c.txt", "c"));

    let addr = start_server(root).await;
    let mut client = Client::connect(addr).await;

    let data = client.pasv().await;
    client.send("LIST").await;
    client.expect("150 Here comes the directory listing.").await;
    let listing = String::from_utf8(read_to_end(data).await).unwrap();
    client.expect("226 Directory send OK.").await;

    let names: Vec<&str> = listing
        .lines()
        .map(|line| line.rsplit(' ').next().unwrap())
        .collect();
    assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
    assert!(listing.lines().all(|line| line.starts_with("-r--r--r-- ")));
}

#[tokio::test]
async fn size_and_dele_behavior() {
    let root = MemoryNode::dir("root");
    root.add(MemoryNode::file("file.txt", "12345"));
    root.add(MemoryNode::dir("folder"));

    let addr = start_server(root).await;
    let mut client = Client::connect(addr).await;

    client.send("SIZE file.txt").await;
    client.expect("213 5").await;
    client.send("SIZE folder").await;
    client.expect("550 Could not get file size.").await;
    client.send("SIZE missing.txt").await;
    client.expect("550 Could not get file size.").await;

    // DELE never deletes.
    client.send("DELE file.txt").await;
    client.expect("550 Permission denied.").await;
    client.send("SIZE file.txt").await;
    client.expect("213 5").await;
}

#[tokio::test]
async fn cwd_and_cdup_validate_targets() {
    let root = MemoryNode::dir("root");
    let folder = MemoryNode::dir("folder");
    folder.add(MemoryNode::dir("inner"));
    root.add(folder);

    let addr = start_server(root).await;
    let mut client = Client::connect(addr).await;

    client.send("CWD folder/inner").await;
    client.expect("250 Directory successfully changed.").await;
    client.send("PWD").await;
    assert_eq!(client.line().await, "257 \"/folder/inner\"");

    // A failed change leaves cwd untouched.
    client.send("CWD missing").await;
    client.expect("550 Failed to change directory.").await;
    client.send("PWD").await;
    assert_eq!(client.line().await, "257 \"/folder/inner\"");

    client.send("CDUP").await;
    client.expect("250 Directory successfully changed.").await;
    client.send("PWD").await;
    assert_eq!(client.line().await, "257 \"/folder\"");

    // CDUP at the root stays at the root.
    client.send("CDUP").await;
    client.expect("250 Directory successfully changed.").await;
    client.send("CDUP").await;
    client.expect("250 Directory successfully changed.").await;
    client.send("PWD").await;
    assert_eq!(client.line().await, "257 \"/\"");
}

#[tokio::test]
async fn rest_offset_is_consumed_once() {
    let root = MemoryNode::dir("root");
    root.add(MemoryNode::file("file.txt", "abcdef"));

    let addr = start_server(root).await;
    let mut client = Client::connect(addr).await;

    client.send("REST 3").await;
    client.expect("350 Skipped 3 bytes").await;

    let data = client.pasv().await;
    client.send("RETR file.txt").await;
    client.expect("150").await;
    assert_eq!(read_to_end(data).await, b"def");
    client.expect("226 File sent").await;

    // The next transfer starts from the beginning again.
    let data = client.pasv().await;
    client.send("RETR file.txt").await;
    client.expect("150").await;
    assert_eq!(read_to_end(data).await, b"abcdef");
    client.expect("226 File sent").await;
}

#[tokio::test]
async fn mkd_creates_once() {
    let addr = start_server(MemoryNode::dir("root")).await;
    let mut client = Client::connect(addr).await;

    client.send("MKD fresh").await;
    client.expect("200 created directory.").await;
    client.send("CWD fresh").await;
    client.expect("250 Directory successfully changed.").await;
    client.send("CDUP").await;
    client.expect("250").await;

    client.send("MKD fresh").await;
    client
        .expect("550 Failed to create directory. (it exists)")
        .await;
}

#[tokio::test]
async fn active_mode_via_port() {
    let root = MemoryNode::dir("root");
    root.add(MemoryNode::file("a.txt", "a"));

    let addr = start_server(root).await;
    let mut client = Client::connect(addr).await;

    // The client listens; the server connects out.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

    client
        .send(&format!("PORT 127,0,0,1,{},{}", port / 256, port % 256))
        .await;
    client.expect("200 PORT command successful.").await;
    let data = accept.await.unwrap();

    client.send("LIST").await;
    client.expect("150 Here comes the directory listing.").await;
    let listing = String::from_utf8(read_to_end(data).await).unwrap();
    client.expect("226 Directory send OK.").await;
    assert!(listing.contains("a.txt"));
}

#[tokio::test]
async fn fixed_acknowledgements_and_unknown_commands() {
    let addr = start_server(MemoryNode::dir("root")).await;
    let mut client = Client::connect(addr).await;

    client.send("SYST").await;
    client.expect("215 UNIX Type: L8").await;
    client.send("TYPE I").await;
    client.expect("200 Switching to Binary mode.").await;
    client.send("MODE S").await;
    client.expect("200 Mode set to S.").await;
    client.send("MODE X").await;
    client.expect("504 Bad MODE command.").await;
    client.send("NOOP").await;
    client.expect("200 NOOP ok.").await;
    client.send("SITE CHMOD").await;
    client.expect("200 Nothing to see here").await;
    client.send("OPTS utf8 on").await;
    client.expect("200 UTF8 always ON.").await;

    client.send("FEAT").await;
    client.expect("211-Features:").await;
    client.expect(" MDTM").await;
    client.expect(" PASV").await;
    client.expect("211 end").await;

    client.send("RNFR a.txt").await;
    client.expect("350 Okay").await;
    client.send("RNTO b.txt").await;
    client.expect("250 Renamed").await;

    client.send("FROB").await;
    client.expect("502 FROB not implemented.").await;
}

#[tokio::test]
async fn read_only_policy_blocks_uploads() {
    let root = MemoryNode::dir("root");
    let server = FtpServer::bind_with_policy("127.0.0.1:0", root, Arc::new(ReadOnly))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut client = Client::connect(addr).await;
    let mut data = client.pasv().await;
    client.send("STOR blocked.txt").await;
    client.expect("150 Entering Transfer Mode").await;
    data.write_all(b"nope").await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    client.expect("226 File uploaded successfully").await;

    // The policy swallowed the add: the file never landed.
    client.send("SIZE blocked.txt").await;
    client.expect("550 Could not get file size.").await;
}
