use std::io::{self, Write};

use tracing::warn;

use super::Reporter;
use crate::fmt::{FmtStyle, format_bytes, format_bytes_rate, format_percent};
use crate::snapshot::NodeStatsSnapshot;

/// How each snapshot is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsoleFormat {
    /// Human-readable stats block.
    #[default]
    Text,
    /// One JSON document per line.
    Json,
}

/// Prints every snapshot, as a stats block or as a JSON line.
pub struct ConsoleReporter<W: Write = io::Stdout> {
    out: W,
    format: ConsoleFormat,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            format: ConsoleFormat::Text,
        }
    }

    pub fn with_format(mut self, format: ConsoleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn write_json(&mut self, s: &NodeStatsSnapshot) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, s)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    fn write_snapshot(&mut self, s: &NodeStatsSnapshot) -> io::Result<()> {
        let out = &mut self.out;
        writeln!(out, "========================= Stats =========================")?;

        if let (Some(avg), Some(cpus)) = (s.cpu_average(), &s.cpu_percents) {
            writeln!(
                out,
                "Cpu percent:           {}, {} cpu(s)",
                format_percent(avg),
                cpus.len()
            )?;
        }

        if let Some(memory) = &s.memory {
            writeln!(
                out,
                "Memory used:           {}/{}",
                format_bytes(memory.used, FmtStyle::Detail),
                format_bytes(memory.total, FmtStyle::Detail)
            )?;
        }

        if let Some(disks) = &s.disk_usage {
            writeln!(out, "Disk usage:")?;
            for disk in disks {
                writeln!(
                    out,
                    "  - {}: {}/{} ({})",
                    disk.path,
                    format_bytes(disk.used, FmtStyle::Detail),
                    format_bytes(disk.total, FmtStyle::Detail),
                    format_percent(disk.used_percent)
                )?;
            }
        }

        if let Some(io) = &s.disk_io {
            writeln!(
                out,
                "Disk IO: R:{}, W:{}",
                format_bytes_rate(io.read_bps, FmtStyle::Detail),
                format_bytes_rate(io.write_bps, FmtStyle::Detail)
            )?;
        }

        if let Some(io) = &s.net_io {
            writeln!(
                out,
                "NET IO: R:{}, S:{}",
                format_bytes_rate(io.read_bps, FmtStyle::Detail),
                format_bytes_rate(io.write_bps, FmtStyle::Detail)
            )?;
        }

        if let Some(gpus) = &s.gpus {
            for gpu in gpus {
                writeln!(
                    out,
                    "GPU #{}: {} (memory {})",
                    gpu.index,
                    format_percent(gpu.gpu_percent),
                    format_percent(gpu.memory_percent)
                )?;
            }
        }

        if let Some(processes) = &s.processes {
            writeln!(out, "Processes:")?;
            for p in processes {
                writeln!(
                    out,
                    "  - {} ({}): cpu {}, memory {}",
                    p.name,
                    p.pid,
                    format_percent(p.cpu_percent),
                    format_bytes(p.memory_bytes, FmtStyle::Detail)
                )?;
            }
        }

        writeln!(out)?;
        out.flush()
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, snapshot: &NodeStatsSnapshot) {
        let written = match self.format {
            ConsoleFormat::Text => self.write_snapshot(snapshot),
            ConsoleFormat::Json => self.write_json(snapshot),
        };
        if let Err(e) = written {
            warn!("Failed to print stats: {}", e);
        }
    }

    fn shutdown(&mut self) {
        let _ = self.out.flush();
    }
}
