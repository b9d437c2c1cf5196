use harpio_device::{ReadOutcome, RegisterDump};

use crate::cmd::DumpArgs;
use crate::exit::{device_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.connect.open()?;
    let dump = if args.common {
        device.dump_common()
    } else {
        device.dump_registers()
    }
    .map_err(|err| device_error("dump failed", err))?;
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    print_dump(&dump, format);
    let failed = dump.registers.len() - dump.succeeded();
    if failed > 0 {
        tracing::warn!(failed, "some registers could not be read");
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

fn print_dump(dump: &RegisterDump, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(dump),
        OutputFormat::Table => print_table(
            &["ADDR", "REGISTER", "TYPE", "VALUE"],
            dump.registers.iter().map(|r| {
                let (payload_type, value) = match &r.outcome {
                    ReadOutcome::Ok {
                        value,
                        payload_type,
                        ..
                    } => (payload_type.name().to_string(), value.to_string()),
                    ReadOutcome::Failed { kind, error } => {
                        ("-".to_string(), format!("<{kind}> {error}"))
                    }
                };
                vec![r.address.to_string(), r.name.clone(), payload_type, value]
            }),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for r in &dump.registers {
                match &r.outcome {
                    ReadOutcome::Ok { value, .. } => println!("{:>3} {:<18} {value}", r.address, r.name),
                    ReadOutcome::Failed { kind, .. } => {
                        println!("{:>3} {:<18} <{kind}>", r.address, r.name)
                    }
                }
            }
        }
    }
}
