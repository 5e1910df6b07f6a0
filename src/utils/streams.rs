// src/utils/streams.rs
use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}


/// Generates any number of output streams from a single input stream.
/// Every item is cloned to every output; nothing is dropped.
///
/// # Arguments
///
/// * `input_rx' - Receiver stream: tokio::mpsc
/// * 'num_streams' - Number of output streams to generate.
/// * 'buffer_size' - Capacity of each output channel.
///
/// # Returns
/// Vector of output streams, and a handle resolving to the number of items forwarded.
///
pub fn t_junction<T>(
    mut input_rx: mpsc::Receiver<T>,
    num_streams: usize,
    buffer_size: usize,
) -> (Vec<mpsc::Receiver<T>>, JoinHandle<Result<u64>>)
where
    T: Clone + Send + 'static,
{
    let mut senders = Vec::with_capacity(num_streams);
    let mut streams = Vec::with_capacity(num_streams);
    for _ in 0..num_streams {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        senders.push(tx);
        streams.push(rx);
    }

    let task = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(item) = input_rx.recv().await {
            for (i, tx) in senders.iter().enumerate() {
                tx.send(item.clone())
                    .await
                    .map_err(|_| anyhow!("t_junction output {} closed after {} items", i, count))?;
            }
            count += 1;
        }
        Ok(count)
    });

    (streams, task)
}


/// Drains stdout or stderr of a child into lines. Bytes that are not UTF-8 are
/// replaced, so tool noise never fails the read.
pub async fn read_child_output_to_vec(child: &mut Child, stream: ChildStream) -> Result<Vec<String>> {
    match stream {
        ChildStream::Stdout => {
            let stdout = child.stdout.take().ok_or_else(|| anyhow!("Child stdout not piped"))?;
            read_lines_lossy(stdout).await
        }
        ChildStream::Stderr => {
            let stderr = child.stderr.take().ok_or_else(|| anyhow!("Child stderr not piped"))?;
            read_lines_lossy(stderr).await
        }
    }
}


async fn read_lines_lossy<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<String>> {
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    Ok(lines)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_t_junction_broadcasts_every_item() -> Result<()> {
        let (tx, rx) = mpsc::channel(4);
        let (outputs, task) = t_junction(rx, 3, 2);

        let mut readers = Vec::new();
        for mut out in outputs {
            readers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = out.recv().await {
                    seen.push(item);
                }
                seen
            }));
        }

        for i in 0..10u32 {
            tx.send(i).await?;
        }
        drop(tx);

        assert_eq!(task.await??, 10);
        for reader in readers {
            assert_eq!(reader.await?, (0..10).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_t_junction_reports_closed_output() -> Result<()> {
        let (tx, rx) = mpsc::channel(4);
        let (mut outputs, task) = t_junction(rx, 2, 1);
        outputs.pop();
        tx.send(1u8).await?;
        drop(tx);
        assert!(task.await?.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_child_output_to_vec() -> Result<()> {
        let mut child = Command::new("sh")
            .args(["-c", "echo one; echo two"])
            .stdout(Stdio::piped())
            .spawn()?;
        let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        child.wait().await?;
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_child_output_tolerates_invalid_utf8() -> Result<()> {
        let mut child = Command::new("sh")
            .args(["-c", "printf 'ok\\n\\377\\376 warn\\n' >&2"])
            .stderr(Stdio::piped())
            .spawn()?;
        let lines = read_child_output_to_vec(&mut child, ChildStream::Stderr).await?;
        assert!(child.wait().await?.success());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with(" warn"));
        assert!(lines[1].contains('\u{FFFD}'));
        Ok(())
    }
}
