// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use clap::{Parser, ValueEnum};
use csv_attest::cache::CertCache;
use csv_attest::guest::{self, Channel, CsvGuestDevice, Hypercall};
use csv_attest::hygon_kds::{HygonKds, KDS_CERT_SITE};
use csv_attest::report::{self, AttestationReport, ReportDetails};
use csv_attest::verify::verify_report;
use std::error::Error;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use zerocopy::AsBytes;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ChannelKind {
    /// /dev/csv-guest if present, hypercall otherwise
    Auto,
    /// csv-guest driver
    Ioctl,
    /// vmmcall, verifies the session MAC
    Vmmcall,
}

impl ChannelKind {
    fn open(self) -> Result<Channel, guest::AcquireError> {
        match self {
            ChannelKind::Auto => Channel::detect(),
            ChannelKind::Ioctl => Ok(Channel::Device(CsvGuestDevice::default())),
            ChannelKind::Vmmcall => Ok(Channel::Hypercall(Hypercall::from_env()?)),
        }
    }
}

#[derive(clap::Subcommand)]
enum Action {
    /// Request an attestation report
    Report {
        /// Custom data embedded in the report, at most 64 bytes
        #[arg(short, long)]
        data: String,

        #[arg(short, long, value_enum, default_value_t = ChannelKind::Auto)]
        channel: ChannelKind,

        /// Write the raw report bytes to this file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print the report to stdout
        #[arg(short, long)]
        print: bool,

        /// Keep the sealing key in the report
        #[arg(long)]
        sealing_key: bool,
    },
    /// Verify a report against the Hygon chain of trust
    Verify {
        /// Raw unmodified report bytes, a fresh report is requested otherwise
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Custom data for a freshly requested report
        #[arg(short, long, default_value = "")]
        data: String,

        #[arg(short, long, value_enum, default_value_t = ChannelKind::Auto)]
        channel: ChannelKind,

        /// Directory holding hrk.cert and <chip_id>_hsk_cek.cert
        #[arg(long, default_value = ".")]
        cache_dir: PathBuf,

        #[arg(long, default_value = KDS_CERT_SITE)]
        kds_url: String,

        /// Print the report to stdout
        #[arg(short, long)]
        print: bool,
    },
    /// Print the VM sealing key
    SealingKey {
        #[arg(short, long, value_enum, default_value_t = ChannelKind::Auto)]
        channel: ChannelKind,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    match args.action {
        Action::Report {
            data,
            channel,
            out,
            print,
            sealing_key,
        } => {
            let mut report = guest::get_report(&channel.open()?, data.as_bytes())?;
            if !sealing_key {
                report.clear_sealing_key();
            }
            if let Some(path) = out {
                fs::write(&path, report.as_bytes())?;
                println!("report written to {}", path.display());
            }
            if print {
                print_details(&report)?;
            }
        }
        Action::Verify {
            file,
            data,
            channel,
            cache_dir,
            kds_url,
            print,
        } => {
            let report = match file {
                Some(file_name) => report::parse(&read_file(&file_name)?)?,
                None => guest::get_report(&channel.open()?, data.as_bytes())?,
            };

            let cache = CertCache::with_upstream(cache_dir, HygonKds::new(kds_url));
            let verified = verify_report(&report, &cache).map_err(|e| {
                eprintln!("verification failed at stage: {}", e.stage());
                e
            })?;
            println!("report verified, measurement {}", verified.details.measure);

            if print {
                print_details(&report)?;
            }
        }
        Action::SealingKey { channel } => {
            let key = guest::get_sealing_key(&channel.open()?)?;
            println!("{}", hex::encode(key));
        }
    }

    Ok(())
}

fn print_details(report: &AttestationReport) -> Result<(), serde_json::Error> {
    let details = ReportDetails::from(report);
    println!("{}", serde_json::to_string_pretty(&details)?);
    Ok(())
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}
