use anyhow::Result;
use clap::{Args, ValueEnum};
use message_schema::{DataRequest, FormContext};

use crate::cli::context::CliContext;
use crate::cli::output::emit_structured;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FormContextArg {
    Initial,
    AdditionalForm,
}

impl From<FormContextArg> for FormContext {
    fn from(value: FormContextArg) -> Self {
        match value {
            FormContextArg::Initial => FormContext::Initial,
            FormContextArg::AdditionalForm => FormContext::AdditionalForm,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct TemplateArgs {
    /// Field keys requested by the popup
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Form context of the data request
    #[arg(long, value_enum, default_value = "initial")]
    pub form_context: FormContextArg,
}

pub fn cmd_template(args: TemplateArgs, ctx: &CliContext) -> Result<()> {
    let request = DataRequest {
        id: "template".to_string(),
        correlation_id: String::new(),
        form_context: args.form_context.into(),
        data: args.keys,
    };
    let template = request.response_template();
    if emit_structured(ctx.output(), &template)? {
        return Ok(());
    }

    println!(
        "Data response template ({:?}, {} field(s)):",
        request.form_context,
        request.data.len()
    );
    println!("{}", serde_json::to_string_pretty(&template)?);
    Ok(())
}
