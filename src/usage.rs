//! Process and data-directory resource snapshots.
//!
//! Taken before the driver opens, right before the cohort starts, and after
//! it finishes; the deltas give a rough account of what the run cost the
//! host. RAM is the peak RSS reported by the kernel, so the pre-open value
//! substitutes for the start to exclude the driver's own footprint.

use std::io;
use std::path::Path;

/// One snapshot of process resource usage plus data-directory size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// Peak resident set size, KiB.
    pub ram_kib: i64,
    /// Bytes under the data directory.
    pub disk: i64,

    pub iops_read: i64,
    pub iops_write: i64,
    pub iops_page: i64,

    pub cpu_user_ns: i64,
    pub cpu_kernel_ns: i64,
}

impl Usage {
    pub fn load(datadir: &Path) -> io::Result<Usage> {
        let mut ru = unsafe { std::mem::zeroed::<libc::rusage>() };
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut ru) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let disk = if datadir.as_os_str().is_empty() {
            0
        } else {
            dir_size(datadir)?
        };

        Ok(Usage {
            ram_kib: ru.ru_maxrss,
            disk,
            iops_read: ru.ru_inblock,
            iops_write: ru.ru_oublock,
            iops_page: ru.ru_majflt,
            cpu_user_ns: ru.ru_utime.tv_sec * 1_000_000_000 + ru.ru_utime.tv_usec * 1_000,
            cpu_kernel_ns: ru.ru_stime.tv_sec * 1_000_000_000 + ru.ru_stime.tv_usec * 1_000,
        })
    }
}

fn dir_size(path: &Path) -> io::Result<i64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0i64;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len() as i64;
        }
    }
    Ok(total)
}

/// Prints the delta between two snapshots.
pub fn print_delta(start: &Usage, finish: &Usage) {
    println!();
    println!(">>>>>>>>>>>>>>>>>>>>>>> resources usage <<<<<<<<<<<<<<<<<<<<<<<");

    println!(
        "iops: read {}, write {}, page {}",
        finish.iops_read - start.iops_read,
        finish.iops_write - start.iops_write,
        finish.iops_page - start.iops_page
    );

    println!(
        "cpu: user {:.6}, system {:.6}",
        (finish.cpu_user_ns - start.cpu_user_ns) as f64 / 1e9,
        (finish.cpu_kernel_ns - start.cpu_kernel_ns) as f64 / 1e9
    );

    let mb = (1u64 << 20) as f64;
    println!(
        "space: disk {:.6}, ram {:.6}",
        (finish.disk - start.disk) as f64 / mb,
        ((finish.ram_kib - start.ram_kib) * 1024) as f64 / mb
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn snapshot_loads() {
        let usage = Usage::load(Path::new("")).unwrap();
        assert!(usage.ram_kib > 0);
    }

    #[test]
    fn directory_sizes_add_up() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let mut f = std::fs::File::create(dir.path().join("a")).unwrap();
        f.write_all(&[0u8; 100]).unwrap();
        let mut g = std::fs::File::create(sub.join("b")).unwrap();
        g.write_all(&[0u8; 28]).unwrap();
        drop((f, g));

        assert_eq!(dir_size(dir.path()).unwrap(), 128);
        assert_eq!(dir_size(&dir.path().join("missing")).unwrap(), 0);
    }
}
