//! Relay CLI Demo
//!
//! Relays stdin lines through a buffer to stdout, one frame per line.
//!
//! Usage: `relay_demo [slotted|pooled|unpooled]` (default: slotted).
//! Set `RUST_LOG=debug` to see drops and close transitions.

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use framebuf::bitrate::Calculator;
use framebuf::{Backend, Buffer, BufferConfig, BufferError, Reader, Writer};

const TIMEOUT: Duration = Duration::from_millis(100);
const REPORT_EVERY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let backend = match std::env::args().nth(1).as_deref() {
        None | Some("slotted") => Backend::Slotted,
        Some("pooled") => Backend::Pooled,
        Some("unpooled") => Backend::Unpooled,
        Some(other) => return Err(format!("unknown backend: {other}").into()),
    };
    let config = BufferConfig::new(backend, 8, 256, TIMEOUT);
    let (writer, reader) = Buffer::new(&config)?.split();
    log::info!("relaying stdin through a {backend:?} buffer");

    let calc = Arc::new(Calculator::new());

    let reader_task = tokio::task::spawn_blocking({
        let calc = Arc::clone(&calc);
        move || read_all(reader, &calc)
    });
    let writer_task = tokio::spawn(write_all(writer));

    let (written, read) = tokio::join!(writer_task, reader_task);
    let drops = written?;
    let frames = read??;

    eprintln!("All tasks completed: {frames} frames relayed, {drops} drops");
    Ok(())
}

async fn write_all(mut writer: Writer) -> u64 {
    eprintln!("Enter text (empty line to quit):");

    let stdin = tokio::io::stdin();
    let reader = tokio::io::BufReader::new(stdin);
    let mut lines = tokio::io::AsyncBufReadExt::lines(reader);

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            break;
        }

        // Writes may wait for the consumer; keep them off the async workers
        let result = tokio::task::block_in_place(|| {
            writer.write(line.as_bytes())?;
            writer.write(b"\n")?;
            writer.flush()
        });
        match result {
            Ok(()) => {}
            Err(e @ BufferError::TooLong { .. }) => eprintln!("Skipped line: {e}"),
            Err(e) => {
                eprintln!("Write error: {e}");
                break;
            }
        }
    }

    if let Err(e) = tokio::task::block_in_place(|| writer.close()) {
        eprintln!("Close error: {e}");
    }
    eprintln!("Writer closed");
    // Includes a drop caused by the final flush
    writer.drops()
}

fn read_all(mut reader: Reader, calc: &Calculator) -> Result<u64, BufferError> {
    let stdout = std::io::stdout();
    let mut frames = 0;
    let mut last_report = Instant::now();

    loop {
        match reader.next(TIMEOUT) {
            Ok(handle) => {
                let mut out = stdout.lock();
                let n = reader.write_to(handle, &mut out)?;
                out.flush()?;
                reader.close_chunk(handle)?;
                calc.report(n);
                frames += 1;
            }
            Err(BufferError::Timeout) => {}
            Err(BufferError::EndOfStream) => {
                eprintln!("(reader) EOF");
                break;
            }
            Err(e) => return Err(e),
        }

        if last_report.elapsed() >= REPORT_EVERY {
            log::info!("relay bitrate: {} bit/s", calc.bitrate());
            last_report = Instant::now();
        }
    }
    Ok(frames)
}
