use super::EXIT_SUCCESS;
use clap::{Command, CommandFactory};
use std::path::Path;

fn render_page(cmd: Command, dir: &Path, page: &str) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    let path = dir.join(format!("{page}.1"));
    std::fs::write(&path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

/// One page for the binary plus one `<bin>-<subcommand>` page per subcommand.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    let name = cmd.get_name().to_owned();
    for sub in cmd.get_subcommands() {
        render_page(sub.clone(), dir, &format!("{name}-{}", sub.get_name()))?;
    }
    render_page(cmd, dir, &name)?;
    println!("man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
