use sysinfo::{ProcessesToUpdate, System};

/// Kills every process whose name contains one of `names`, ignoring case.
/// Never touches the current process. Returns how many were killed.
pub fn kill_processes(names: &[String]) -> usize {
    if names.is_empty() {
        return 0;
    }

    let needles: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    let own_pid = sysinfo::get_current_pid().ok();

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        if Some(*pid) == own_pid {
            continue;
        }
        let name = process.name().to_string_lossy().to_lowercase();
        if !matches_any(&name, &needles) {
            continue;
        }

        log::info!("Killing process {} [{}]", name, pid);
        if process.kill() {
            killed += 1;
        } else {
            log::warn!("Failed to kill process {} [{}]", name, pid);
        }
    }
    killed
}

fn matches_any(name: &str, needles: &[String]) -> bool {
    needles.iter().any(|needle| !needle.is_empty() && name.contains(needle.as_str()))
}
