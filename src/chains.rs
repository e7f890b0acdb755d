//! Built-in chain definitions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::{ChainDefinition, ChainStep};
use crate::error::Result;
use crate::extract::ExtractionRule;

/// Two-source company lookup: fetch the first row of the societe view, pivot
/// on its `SOC_ID`, and pull the company's record from the parc-admin API.
pub fn company_lookup() -> Result<ChainDefinition> {
    ChainDefinition::builder("company_lookup")
        .step(
            ChainStep::new("get_first_row_mdl_societe")
                .extract_exposed("soc_id", ExtractionRule::field("SOC_ID")),
        )
        .step(
            ChainStep::new("get_company_details_from_parc_admin")
                .bind_from("soc_id", 0, "soc_id")
                .extract_exposed("company_name", ExtractionRule::field("CompanyName"))
                .extract_exposed("status", ExtractionRule::field("Status"))
                .extract_exposed("address", ExtractionRule::field("Address")),
        )
        .summary_instruction(
            "Now summarize this company: name, status, address, and any other meaningful insight.",
        )
        .build()
}

/// Every chain the service ships with, keyed by name.
pub fn builtin_chains() -> Result<HashMap<String, Arc<ChainDefinition>>> {
    let mut chains = HashMap::new();
    let lookup = company_lookup()?;
    chains.insert(lookup.name().to_string(), Arc::new(lookup));
    Ok(chains)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_lookup_is_well_formed() {
        let chain = company_lookup().unwrap();
        assert_eq!(chain.name(), "company_lookup");
        assert_eq!(chain.steps().len(), 2);
        assert_eq!(chain.steps()[0].tool(), "get_first_row_mdl_societe");
        assert_eq!(chain.steps()[1].tool(), "get_company_details_from_parc_admin");
    }

    #[test]
    fn builtin_chains_are_keyed_by_name() {
        let chains = builtin_chains().unwrap();
        assert!(chains.contains_key("company_lookup"));
    }
}
