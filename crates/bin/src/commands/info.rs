//! Info command - compiles the policy and lists authorities, accounts and
//! static files.

use keyserver::Context;
use keyserver::config::Config;

use crate::cli::InfoArgs;
use crate::output::{OutputFormat, print_table};

/// Run the info command
pub fn run(args: &InfoArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.config)?;
    let context = Context::compile(&config)?;

    let authorities: Vec<Vec<String>> = context
        .authorities()
        .iter()
        .map(|authority| vec![authority.name().to_string(), authority.kind().to_string()])
        .collect();
    let accounts: Vec<Vec<String>> = context
        .accounts()
        .iter()
        .map(|account| {
            vec![
                account.principal().to_string(),
                account.group().to_string(),
                account
                    .limit_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                account.api_names().join(","),
            ]
        })
        .collect();
    let static_files: Vec<&str> = context.static_file_names().collect();

    match format {
        OutputFormat::Human => {
            println!("Authentication: {}", config.authentication_authority);
            println!(
                "Admission:      {}",
                config.admission_authority.as_deref().unwrap_or("disabled")
            );
            println!();
            print_table(&["AUTHORITY", "TYPE"], &authorities);
            println!();
            print_table(&["PRINCIPAL", "GROUP", "LIMIT-IP", "APIS"], &accounts);
            if !static_files.is_empty() {
                println!();
                println!("Static files: {}", static_files.join(", "));
            }
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "authentication_authority": config.authentication_authority,
                "admission_authority": config.admission_authority,
                "authorities": authorities
                    .iter()
                    .map(|row| serde_json::json!({"name": row[0], "type": row[1]}))
                    .collect::<Vec<_>>(),
                "accounts": context
                    .accounts()
                    .iter()
                    .map(|account| serde_json::json!({
                        "principal": account.principal(),
                        "group": account.group(),
                        "limit_ip": account.limit_ip(),
                        "apis": account.api_names(),
                    }))
                    .collect::<Vec<_>>(),
                "static_files": static_files,
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }

    Ok(())
}
