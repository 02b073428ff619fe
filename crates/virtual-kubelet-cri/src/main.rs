//! Entry point for the CRI-backed virtual node agent.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: the logger and worker threads also write to stderr.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    virtual_kubelet_cri::run(std::env::args_os(), &mut stdout, &mut stderr)
}
