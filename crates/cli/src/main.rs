//! `salesprice` - recompute sale line prices from the command line.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

use salesprice_currency::CurrencyCode;

mod commands;
mod config;
mod input;
mod output;

use commands::FormInput;
use config::Config;
use input::{RatesDocument, SalesDocument, read_json};

#[derive(Parser)]
#[command(name = "salesprice", version)]
#[command(about = "Recompute sale line prices by percentage or to a fixed total")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute unit prices and print the resulting sales as JSON
    Recompute(RecomputeArgs),
    /// Print the sales of an input file with their untaxed amounts
    Show {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

#[derive(Args)]
struct RecomputeArgs {
    /// Sales document (JSON)
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Relative change of every unit price, e.g. 0.05 or -0.1
    #[arg(long, allow_negative_numbers = true, conflicts_with = "amount")]
    percentage: Option<Decimal>,

    /// Target untaxed amount of each sale
    #[arg(long)]
    amount: Option<Decimal>,

    /// Currency of --amount (defaults to the sale or company currency)
    #[arg(long, requires = "amount")]
    currency: Option<CurrencyCode>,

    /// Exchange rates document (JSON)
    #[arg(long, env = "SALESPRICE_RATES", value_name = "FILE")]
    rates: Option<PathBuf>,

    /// Only recompute the sale with this number; repeatable
    #[arg(long = "sale", value_name = "NUMBER")]
    sales: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    salesprice_observability::init(cli.config.log_format);

    let views = match &cli.command {
        Command::Recompute(args) => {
            let doc: SalesDocument = read_json(&args.input)?;
            let rates = args
                .rates
                .as_deref()
                .map(read_json::<RatesDocument>)
                .transpose()?
                .map(RatesDocument::into_table);
            let form = FormInput {
                percentage: args.percentage,
                amount: args.amount,
                currency: args.currency.clone(),
            };
            commands::recompute(&cli.config, &doc, rates, &args.sales, &form)?
        }
        Command::Show { input } => commands::show(&read_json(input)?)?,
    };

    output::print_json(&views)
}
