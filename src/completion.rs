//! Joins the protocol exchange with the remote command's exit.
//!
//! Both run concurrently in the calling task. The exit future is polled
//! the whole time so a command that dies early is noticed, and its result
//! is held until the exchange is done. The exchange's outcome always
//! takes precedence when deciding what to report.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ScpError;
use crate::types::ExitStatus;
use crate::utils::bounded;

/// Outcomes of the exchange and of the exit wait
#[derive(Debug)]
pub(crate) struct Completion<T> {
    pub(crate) foreground: Result<T, ScpError>,
    pub(crate) exit: Result<ExitStatus, ScpError>,
}

/// Drives `foreground` and `exit` together until both are done.
///
/// Once the foreground finishes, the exit wait is bounded by `exit_timeout`.
pub(crate) async fn synchronize<T, F, E>(
    foreground: F,
    exit: E,
    exit_timeout: Option<Duration>,
) -> Completion<T>
where
    F: Future<Output = Result<T, ScpError>>,
    E: Future<Output = Result<ExitStatus, ScpError>>,
{
    tokio::pin!(foreground);
    tokio::pin!(exit);

    let mut early_exit = None;
    let foreground = loop {
        tokio::select! {
            biased;
            result = &mut foreground => break result,
            result = &mut exit, if early_exit.is_none() => {
                debug!("Remote command ended before the exchange did: {:?}", result);
                early_exit = Some(result);
            }
        }
    };

    let exit = match early_exit {
        Some(result) => result,
        None => bounded(exit_timeout, exit).await,
    };
    Completion { foreground, exit }
}

impl<T> Completion<T> {
    /// The value and a successful exit status, or the first error.
    ///
    /// An exchange error beats an exit error, which beats a non-zero exit.
    pub(crate) fn into_result(self) -> Result<(T, ExitStatus), ScpError> {
        let value = match self.foreground {
            Ok(value) => value,
            Err(err) => {
                match &self.exit {
                    Ok(status) if !status.success() => {
                        warn!("Remote command also failed: {}", status)
                    }
                    Err(exit_err) => {
                        warn!("Waiting for the remote command also failed: {}", exit_err)
                    }
                    Ok(_) => {}
                }
                return Err(err);
            }
        };
        let status = self.exit?;
        if !status.success() {
            return Err(ScpError::RemoteExit { status });
        }
        Ok((value, status))
    }
}

impl<T> Completion<Option<T>> {
    /// Like [`Completion::into_result`], but a foreground that yielded `None`
    /// was cancelled: the command's exit is only logged then.
    pub(crate) fn into_transfer_result(self) -> Result<Option<(T, ExitStatus)>, ScpError> {
        if matches!(self.foreground, Ok(None)) {
            match &self.exit {
                Ok(status) => debug!("Remote command after cancellation: {}", status),
                Err(err) => debug!("Remote command after cancellation: {}", err),
            }
            return Ok(None);
        }
        self.into_result()
            .map(|(value, status)| value.map(|value| (value, status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn foreground_error_wins_but_exit_is_still_observed() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        let completion = synchronize(
            async { Err::<(), _>(ScpError::ShortRead { expected: 11, received: 3 }) },
            async move {
                flag.store(true, Ordering::SeqCst);
                Err::<ExitStatus, _>(ScpError::Session("channel closed".to_string()))
            },
            None,
        )
        .await;

        assert!(observed.load(Ordering::SeqCst));
        assert!(completion.exit.is_err());
        assert!(matches!(
            completion.into_result(),
            Err(ScpError::ShortRead { expected: 11, received: 3 })
        ));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_a_clean_exchange() {
        let completion = synchronize(
            async { Ok::<_, ScpError>(5u64) },
            async {
                Ok::<_, ScpError>(
                    ExitStatus::from_code(1).with_stderr("scp: /srv: Permission denied"),
                )
            },
            None,
        )
        .await;

        match completion.into_result() {
            Err(ScpError::RemoteExit { status }) => {
                assert_eq!(status.code, Some(1));
                assert!(status.stderr.contains("Permission denied"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn early_exit_is_kept_until_the_exchange_finishes() {
        let completion = synchronize(
            async {
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                Ok::<_, ScpError>("done")
            },
            async { Ok::<_, ScpError>(ExitStatus::from_code(0)) },
            Some(Duration::from_millis(1)),
        )
        .await;

        let (value, status) = completion.into_result().unwrap();
        assert_eq!(value, "done");
        assert!(status.success());
    }

    #[tokio::test]
    async fn exit_wait_is_bounded_after_the_exchange() {
        let completion = synchronize(
            async { Ok::<_, ScpError>(()) },
            std::future::pending::<Result<ExitStatus, ScpError>>(),
            Some(Duration::from_millis(20)),
        )
        .await;

        assert!(completion.foreground.is_ok());
        assert!(matches!(completion.into_result(), Err(ScpError::Timeout(_))));
    }

    #[tokio::test]
    async fn exit_future_makes_progress_alongside_the_exchange() {
        // the exchange can only finish once the exit side has written to it
        let (mut near, mut far) = tokio::io::duplex(16);
        let completion = synchronize(
            async move {
                let mut byte = [0u8; 1];
                near.read_exact(&mut byte).await?;
                Ok::<_, ScpError>(byte[0])
            },
            async move {
                far.write_all(&[42]).await?;
                Ok::<_, ScpError>(ExitStatus::from_code(0))
            },
            None,
        )
        .await;

        assert_eq!(completion.into_result().unwrap().0, 42);
    }

    #[tokio::test]
    async fn cancelled_transfer_ignores_failed_exit() {
        let completion = synchronize(
            async { Ok::<_, ScpError>(None::<u64>) },
            async {
                Ok::<_, ScpError>(ExitStatus::from_code(1).with_stderr("scp: unexpected EOF"))
            },
            None,
        )
        .await;

        assert!(completion.into_transfer_result().unwrap().is_none());
    }
}
