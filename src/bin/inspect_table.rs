use anyhow::Result;
use physio_tables::timing::{is_workbook, read_sheet, sheet_names};
use std::path::Path;

const PREVIEW_ROWS: usize = 5;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        println!("Usage: {} <table.csv|workbook.xlsx> [sheet]", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let sheet = if is_workbook(path) {
        let names = sheet_names(path)?;
        println!("\nSheets:");
        for name in &names {
            println!("  {}", name);
        }
        match args.get(2).cloned().or_else(|| names.first().cloned()) {
            Some(sheet) => sheet,
            None => return Ok(()),
        }
    } else {
        args.get(2).cloned().unwrap_or_default()
    };

    let table = read_sheet(path, &sheet)?;
    println!("\nHeaders ({}):", table.headers.len());
    println!("{:#?}", table.headers);

    println!("\nFirst {} of {} rows:", PREVIEW_ROWS.min(table.len()), table.len());
    for row in table.rows.iter().take(PREVIEW_ROWS) {
        println!("{}", row.join(" | "));
    }

    Ok(())
}
