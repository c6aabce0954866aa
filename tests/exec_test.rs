mod common;

use common::{FakeHost, ScriptedTransport, client, init_tracing};
use rusty_scp::{ExitStatus, ScpError};
use tokio_test::io::Builder;

#[tokio::test]
async fn exec_returns_stdout() {
    init_tracing();
    let client = client(FakeHost::new().with_command("pwd", b"/home/user\n", 0));

    let output = client.exec("pwd").await.unwrap();

    assert_eq!(output.stdout, b"/home/user\n");
    assert_eq!(output.stdout_lossy(), "/home/user\n");
    assert!(output.status.success());
    assert_eq!(client.transport().commands(), vec!["pwd"]);
}

#[tokio::test]
async fn failed_command_keeps_partial_output() {
    init_tracing();
    let client = client(FakeHost::new().with_command(
        "cat /etc/app.conf /etc/missing.conf",
        b"listen = 8080\n",
        1,
    ));

    let err = client
        .exec("cat /etc/app.conf /etc/missing.conf")
        .await
        .unwrap_err();

    assert_eq!(err.partial_output(), Some(&b"listen = 8080\n"[..]));
    match err.root() {
        ScpError::RemoteExit { status } => assert_eq!(status.code, Some(1)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unknown_command_reports_stderr() {
    init_tracing();
    let client = client(FakeHost::new());

    let err = client.exec("frobnicate --all").await.unwrap_err();

    match err.root() {
        ScpError::RemoteExit { status } => {
            assert_eq!(status.code, Some(127));
            assert!(status.stderr.contains("command not found"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains("exit code 127"));
}

#[tokio::test]
async fn output_split_across_reads_is_joined() {
    init_tracing();
    let mock = Builder::new()
        .read(b"total 8\n")
        .read(b"-rw-r--r-- 1 user user 12 notes.txt\n")
        .build();
    let client = client(ScriptedTransport::new(mock, ExitStatus::from_code(0)));

    let output = client.exec("ls -l").await.unwrap();

    assert_eq!(
        output.stdout_lossy(),
        "total 8\n-rw-r--r-- 1 user user 12 notes.txt\n"
    );
}
