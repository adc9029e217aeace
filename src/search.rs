//! `trag search`: similarity search from the command line.

use anyhow::Result;

use tutor_rag_core::search::{format_context, SearchOptions};

use crate::context::AppContext;

/// Filters for `trag search`. Unset fields fall back to `[retrieval]`.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub tutor: Option<String>,
    pub owner: Option<String>,
    pub documents: Vec<String>,
    pub threshold: Option<f64>,
    pub limit: Option<usize>,
    /// Print the prompt context block instead of the result list.
    pub context: bool,
}

pub async fn run_search(ctx: &AppContext, query: &str, args: SearchArgs) -> Result<()> {
    let defaults = ctx.config.retrieval.search_options();
    let options = SearchOptions {
        limit: args.limit.unwrap_or(defaults.limit),
        threshold: args.threshold.unwrap_or(defaults.threshold),
        document_ids: if args.documents.is_empty() {
            None
        } else {
            Some(args.documents)
        },
        owner_id: args.owner,
    };

    let search = ctx.search();
    let results = match &args.tutor {
        Some(tutor) => search.search_scoped(query, tutor, &options).await?,
        None => search.search(query, &options).await?,
    };

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    if args.context {
        println!("{}", format_context(&results));
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            result.similarity,
            result.document_id,
            result.chunk_index
        );
        println!("    tokens: {}", result.tokens);
        println!("    excerpt: \"{}\"", excerpt(&result.text, 200));
        println!("    id: {}", result.chunk_id);
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
