#![allow(clippy::unwrap_used, missing_docs)]

use std::io::{Read as _, Write as _};
use std::os::fd::AsFd as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tardis_fs::exchange::{
    DescriptorExchange, DescriptorSource as _, ExchangeError, MAX_MESSAGE, read_trigger,
    request_descriptor, send_reply,
};
use tardis_fs::launcher::Launcher;
use tokio::io::AsyncWriteExt as _;
use tokio::net::{UnixListener, UnixStream};

fn temp_file_with(contents: &[u8]) -> std::fs::File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(contents).unwrap();
    file
}

fn read_all(fd: std::os::fd::OwnedFd) -> Vec<u8> {
    use std::io::Seek as _;
    let mut file = std::fs::File::from(fd);
    file.rewind().unwrap();
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).unwrap();
    buf
}

/// An exchange whose "resolver" only writes the rendezvous path it was given to `handoff`
/// and then idles, leaving the test to play the resolver's part.
fn handoff_exchange(socket_dir: &Path, handoff: &Path) -> DescriptorExchange {
    let script = format!("printf '%s' \"$0\" > '{}'; sleep 5", handoff.display());
    DescriptorExchange::new(Launcher::direct(), "sh", "-c", script)
        .socket_dir(socket_dir)
        .window(Duration::from_secs(10))
}

/// Wait for the handoff, then answer one request with `message` and optionally `file`.
async fn fake_resolver(
    handoff: PathBuf,
    message: &'static str,
    file: Option<std::fs::File>,
) -> PathBuf {
    let socket = loop {
        if let Ok(path) = tokio::fs::read_to_string(&handoff).await
            && !path.is_empty()
        {
            break PathBuf::from(path);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let listener = UnixListener::bind(&socket).unwrap();
    let (mut stream, _) = listener.accept().await.unwrap();
    assert!(read_trigger(&mut stream).await.unwrap());
    send_reply(&mut stream, message, file.as_ref().map(|f| f.as_fd()))
        .await
        .unwrap();
    socket
}

#[tokio::test]
async fn descriptor_and_message_cross_a_socket_pair() {
    let (mut client, mut server) = UnixStream::pair().unwrap();
    let file = temp_file_with(b"payload");

    let server = tokio::spawn(async move {
        assert!(read_trigger(&mut server).await.unwrap());
        send_reply(&mut server, "Success", Some(file.as_fd()))
            .await
            .unwrap();
    });

    let reply = request_descriptor(&mut client).await.unwrap();
    server.await.unwrap();

    assert_eq!(reply.message, "Success");
    assert_eq!(read_all(reply.descriptor.unwrap()), b"payload");
}

#[tokio::test]
async fn refusal_carries_only_a_message() {
    let (mut client, mut server) = UnixStream::pair().unwrap();

    let server = tokio::spawn(async move {
        read_trigger(&mut server).await.unwrap();
        send_reply(
            &mut server,
            "Datafile (ID 9) does not belong to experiment (ID 3).",
            None,
        )
        .await
        .unwrap();
    });

    let reply = request_descriptor(&mut client).await.unwrap();
    server.await.unwrap();

    assert!(reply.descriptor.is_none());
    assert_eq!(
        reply.message,
        "Datafile (ID 9) does not belong to experiment (ID 3)."
    );
}

#[tokio::test]
async fn oversized_messages_are_cut() {
    let (mut client, mut server) = UnixStream::pair().unwrap();
    let long = "x".repeat(MAX_MESSAGE * 2);

    let server = tokio::spawn(async move {
        read_trigger(&mut server).await.unwrap();
        send_reply(&mut server, &long, None).await.unwrap();
    });

    let reply = request_descriptor(&mut client).await.unwrap();
    server.await.unwrap();
    assert_eq!(reply.message.len(), MAX_MESSAGE);
}

#[tokio::test]
async fn unexpected_request_is_detected() {
    let (mut client, mut server) = UnixStream::pair().unwrap();
    client.write_all(b"Gimme").await.unwrap();
    client.shutdown().await.unwrap();

    assert!(!read_trigger(&mut server).await.unwrap());
}

#[tokio::test]
async fn silent_close_is_no_reply() {
    let (mut client, server) = UnixStream::pair().unwrap();
    drop(server);

    let err = request_descriptor(&mut client).await.unwrap_err();
    assert!(matches!(err, ExchangeError::NoReply | ExchangeError::Io(_)));
}

#[tokio::test]
async fn resolver_that_exits_early_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = DescriptorExchange::new(Launcher::direct(), "sh", "-c", "exit 3")
        .socket_dir(dir.path())
        .window(Duration::from_secs(10));

    let err = exchange.fetch(1, 2).await.unwrap_err();
    assert!(
        matches!(err, ExchangeError::ResolverExited { status } if status.code() == Some(3)),
        "{err:?}"
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn resolver_that_never_listens_times_out_without_leaking() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = DescriptorExchange::new(Launcher::direct(), "sh", "-c", "sleep 30")
        .socket_dir(dir.path())
        .poll_interval(Duration::from_millis(5))
        .window(Duration::from_millis(200));

    let started = std::time::Instant::now();
    let err = exchange.fetch(1, 2).await.unwrap_err();

    assert!(matches!(err, ExchangeError::ProtocolTimeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_resolver_program_fails_to_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = DescriptorExchange::new(
        Launcher::direct(),
        "/nonexistent/_datafiledescriptord",
        "/etc/tardisfs/resolver.toml",
        "localdb",
    )
    .socket_dir(dir.path());

    let err = exchange.fetch(1, 2).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Spawn { .. }), "{err:?}");
}

#[tokio::test]
async fn full_exchange_delivers_a_descriptor() {
    let sockets = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let handoff = scratch.path().join("handoff");
    let exchange = handoff_exchange(sockets.path(), &handoff);

    let resolver = tokio::spawn(fake_resolver(
        handoff,
        "Success",
        Some(temp_file_with(b"scan data")),
    ));
    let reply = exchange.fetch(73, 901).await.unwrap();
    let socket = resolver.await.unwrap();

    assert_eq!(reply.message, "Success");
    assert_eq!(read_all(reply.descriptor.unwrap()), b"scan data");
    assert!(socket.starts_with(sockets.path()));
    assert!(!socket.exists(), "rendezvous path must be removed");
}

#[tokio::test]
async fn refusal_through_the_source_is_denied() {
    let sockets = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let handoff = scratch.path().join("handoff");
    let exchange = handoff_exchange(sockets.path(), &handoff);

    let resolver = tokio::spawn(fake_resolver(handoff, "Access denied for user alice.", None));
    let err = exchange.open(73, 901).await.unwrap_err();
    resolver.await.unwrap();

    assert!(
        matches!(err, ExchangeError::Denied { ref message } if message == "Access denied for user alice."),
        "{err:?}"
    );
}
