use anyhow::Result;

use cookbook_core::db::Database;

pub(crate) fn cmd_status(db: &Database, self_test: bool, json: bool) -> Result<()> {
    let status = db.status();
    let report = self_test.then(|| db.self_test());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": status,
                "self_test": report,
            }))?
        );
    } else {
        println!("Engine:    {}", status.backend.engine);
        println!("Location:  {}", status.backend.location);
        println!("Ping:      {}", if status.ping { "ok" } else { "FAILED" });
        match (&status.count, &status.count_error) {
            (Some(n), _) => println!("Recipes:   {n}"),
            (None, Some(e)) => println!("Recipes:   error: {e}"),
            (None, None) => println!("Recipes:   unknown"),
        }
        if let Some(report) = &report {
            if report.ok {
                println!("Self-test: ok (wrote and removed row {})", report.id.unwrap_or_default());
            } else {
                let error = report.error.as_deref().unwrap_or("unknown error");
                println!("Self-test: FAILED ({error})");
            }
        }
    }

    if !status.ping || report.as_ref().is_some_and(|r| !r.ok) {
        std::process::exit(1);
    }
    Ok(())
}
