use warp::{Rejection, Reply};

const SUGGESTIONS: &[&str] = &[
    "I need tools for DNA sequence alignment",
    "Looking for RNA-seq analysis software",
    "What tools can I use for variant calling?",
    "I need protein structure prediction tools",
    "Looking for phylogenetic tree construction software",
    "What are the best tools for genome assembly?",
    "I need ChIP-seq analysis software",
    "Looking for single-cell RNA-seq tools",
    "What software works for protein-protein interactions?",
    "I need tools for microbiome analysis",
];

pub async fn handle_suggestions() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({ "suggestions": SUGGESTIONS })))
}
