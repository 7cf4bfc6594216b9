//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` filesystem states
//! for a compute node.

use super::filesystem::MockFs;
use crate::collector::traits::FsSpace;

const GIB: u64 = 1024 * 1024 * 1024;

impl MockFs {
    /// Creates a typical 4-core worker node.
    ///
    /// Includes: init (PID 1), two `python` workers (PIDs 2000, 2001) and a
    /// bash shell, one SATA and one NVMe disk, `lo` and `eth0`, and capacity
    /// answers for `/` and `/mnt`.
    pub fn typical_node() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
",
        );
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.set_diskstats(&[("sda", 20000, 40000), ("nvme0n1", 100000, 60000)]);
        fs.set_net_dev(&[("lo", 1000, 1000), ("eth0", 5000000, 3000000)]);

        fs.add_process(
            1,
            "1 (systemd) S 0 1 1 0 -1 4194560 5000 0 50 0 300 200 0 0 20 0 1 0 1 170000000 3000 18446744073709551615",
            "systemd\n",
        );
        fs.add_process(
            2000,
            "2000 (python) S 1 2000 2000 0 -1 4194304 100 0 0 0 1500 500 0 0 20 0 4 0 1004567 104857600 5000 18446744073709551615",
            "python\n",
        );
        fs.add_process(
            2001,
            "2001 (python) R 1 2001 2001 0 -1 4194304 100 0 0 0 600 400 0 0 20 0 4 0 1200000 52428800 2500 18446744073709551615",
            "python\n",
        );
        fs.add_process(
            2100,
            "2100 (bash) S 1 2100 2100 34816 2100 4194304 800 0 0 0 10 5 0 0 20 0 1 0 1100000 12345678 100 18446744073709551615",
            "bash\n",
        );

        fs.set_space(
            "/",
            FsSpace {
                total: 30 * GIB,
                free: 12 * GIB,
                available: 10 * GIB,
            },
        );
        fs.set_space(
            "/mnt",
            FsSpace {
                total: 100 * GIB,
                free: 90 * GIB,
                available: 90 * GIB,
            },
        );

        fs
    }

    /// Replaces `/proc/diskstats` with one line per `(device, read_sectors, write_sectors)`.
    pub fn set_diskstats(&self, disks: &[(&str, u64, u64)]) {
        let mut content = String::new();
        for (i, (device, read_sectors, write_sectors)) in disks.iter().enumerate() {
            content.push_str(&format!(
                "   8 {:7} {} 1000 100 {} 500 2000 200 {} 1000 0 1500 1500\n",
                i * 16,
                device,
                read_sectors,
                write_sectors
            ));
        }
        self.add_file("/proc/diskstats", content);
    }

    /// Replaces `/proc/net/dev` with one line per `(interface, rx_bytes, tx_bytes)`.
    pub fn set_net_dev(&self, interfaces: &[(&str, u64, u64)]) {
        let mut content = String::from(
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n",
        );
        for (interface, rx, tx) in interfaces {
            content.push_str(&format!(
                "{:>6}: {} 100 0 0 0 0 0 0 {} 100 0 0 0 0 0 0\n",
                interface, rx, tx
            ));
        }
        self.add_file("/proc/net/dev", content);
    }
}
