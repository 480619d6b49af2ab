//! Prints the gateway's OpenAPI document as JSON to stdout.
//!
//! Usage:
//!   cargo run -p prefab-gateway --bin generate-openapi > openapi.json

use prefab_gateway::ApiDoc;

fn main() {
    match ApiDoc::to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize OpenAPI spec: {}", e);
            std::process::exit(1);
        }
    }
}
