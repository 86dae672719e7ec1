use crate::model::{DiscoveryConfig, UnitKind};

/// Build the invocation tokens for a unit.
///
/// `rel` is the root-relative path with `/` separators: the unit directory
/// for app units, the script file for standalone scripts.
pub fn launch_command(
    cfg: &DiscoveryConfig,
    rel: &str,
    kind: UnitKind,
    standalone: bool,
    asgi: bool,
) -> Vec<String> {
    let mut cmd: Vec<String> = cfg.runner.clone();

    if standalone {
        cmd.push(cfg.python.clone());
        cmd.push(rel.to_string());
        return cmd;
    }

    let module = format!("{}.main", rel.replace('/', "."));
    match kind {
        UnitKind::Web if asgi => {
            cmd.push("uvicorn".into());
            cmd.push(format!("{module}:app"));
            cmd.push("--reload".into());
        }
        UnitKind::Web | UnitKind::Cli | UnitKind::Tui | UnitKind::Gui => {
            cmd.push(cfg.python.clone());
            cmd.push("-m".into());
            cmd.push(module);
        }
        UnitKind::Script | UnitKind::Unknown => {
            cmd.push(cfg.python.clone());
            cmd.push(format!("{rel}/main.py"));
        }
    }
    cmd
}
