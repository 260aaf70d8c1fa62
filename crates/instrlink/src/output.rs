use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use instrlink_frame::{escape, Frame, FrameKind};
use instrlink_transport::{sink::format_timestamp, PortInfo};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    kind: &'static str,
    size: usize,
    endpoint: &'a str,
    payload: String,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, endpoint: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                kind: kind_name(frame.kind),
                size: frame.len(),
                endpoint,
                payload: escape(frame.as_bytes()),
                timestamp: format_timestamp(std::time::SystemTime::now()),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SIZE", "ENDPOINT", "PAYLOAD"])
                .add_row(vec![
                    kind_name(frame.kind).to_string(),
                    frame.len().to_string(),
                    endpoint.to_string(),
                    escape(frame.as_bytes()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} size={} endpoint={} payload='{}'",
                kind_name(frame.kind),
                frame.len(),
                endpoint,
                frame.text_preview()
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.as_bytes());
        }
    }
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(ports).unwrap_or_else(|_| "[]".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "USB ID", "SERIAL", "PRODUCT"]);
            for port in ports {
                table.add_row(vec![
                    port.name.clone(),
                    port.usb_id().unwrap_or_default(),
                    port.serial_number.clone().unwrap_or_default(),
                    port.product.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for port in ports {
                match port.usb_id() {
                    Some(id) => println!("{} ({id})", port.name),
                    None => println!("{}", port.name),
                }
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn kind_name(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Complete => "complete",
        FrameKind::Truncated => "truncated",
        FrameKind::Partial => "partial",
    }
}
