//! Baud plan command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    wilcboot::{BaudSetting, LineCaps},
};

/// Print how `rate` would be produced on a line with the given limits.
pub(crate) fn cmd_baud(rate: u32, line: LineCaps, json: bool) -> Result<()> {
    let plan = line
        .plan(rate)
        .with_context(|| format!("Cannot produce {rate} baud"))?;

    if json {
        let info = serde_json::json!({
            "plan": plan,
            "line": line,
            "deviation_percent": plan.deviation_percent(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!("{}", style("Baud plan").bold().underlined());
    eprintln!("  Target:    {}", plan.target);
    match plan.setting {
        BaudSetting::Native { code } => {
            eprintln!("  Setting:   native {code}");
        },
        BaudSetting::Custom {
            divisor,
            base_clock,
            sentinel,
        } => {
            eprintln!("  Setting:   custom divisor {divisor} of {base_clock} Hz");
            eprintln!("  Port rate: {sentinel} (sentinel)");
        },
    }
    eprintln!("  Achieved:  {}", plan.achieved);

    let deviation = format!("{:.2}%", plan.deviation_percent());
    if plan.out_of_tolerance {
        eprintln!(
            "  Deviation: {} {}",
            style(deviation).yellow(),
            style("(out of tolerance)").yellow()
        );
    } else {
        eprintln!("  Deviation: {deviation}");
    }

    Ok(())
}
