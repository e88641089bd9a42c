//! Static catalog of user-selectable options: models, agent modes, task templates and
//! output formats. The HTTP service publishes it on `GET /config` and uses it to turn a
//! run request into a task description.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogOption {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
    /// Files a successful run is expected to leave in its working directory.
    pub output_files: &'static [&'static str],
}

pub const AVAILABLE_MODELS: &[CatalogOption] = &[
    CatalogOption {
        id: "llama-3.3-70b-versatile",
        name: "Llama 3.3 70B",
        description: "Most capable and versatile",
    },
    CatalogOption {
        id: "llama-3.1-8b-instant",
        name: "Llama 3.1 8B",
        description: "Fastest response",
    },
    CatalogOption {
        id: "openai/gpt-oss-120b",
        name: "GPT-OSS 120B",
        description: "High reasoning capability",
    },
    CatalogOption {
        id: "qwen/qwen3-32b",
        name: "Qwen 3 32B",
        description: "Strong open model",
    },
];

pub const AGENT_MODES: &[CatalogOption] = &[
    CatalogOption {
        id: "standard",
        name: "Standard",
        description: "Balanced output with code and brief context",
    },
    CatalogOption {
        id: "detailed",
        name: "Detailed",
        description: "Verbose with explanations and comments",
    },
    CatalogOption {
        id: "concise",
        name: "Concise",
        description: "Minimal output, code only",
    },
];

pub const OUTPUT_FORMATS: &[CatalogOption] = &[
    CatalogOption {
        id: "markdown",
        name: "Markdown",
        description: "Structured text report (.md)",
    },
    CatalogOption {
        id: "json",
        name: "JSON",
        description: "Structured data output (.json)",
    },
    CatalogOption {
        id: "code",
        name: "Code",
        description: "Python source file (.py)",
    },
    CatalogOption {
        id: "plot",
        name: "Visualization",
        description: "Chart or plot image (.png)",
    },
    CatalogOption {
        id: "auto",
        name: "Auto",
        description: "Let the agents decide based on the task",
    },
];

pub const TASK_TEMPLATES: &[TaskTemplate] = &[
    TaskTemplate {
        id: "data_analysis",
        name: "Data Analysis",
        description: "Analyze a dataset, find patterns, create visualizations",
        prompt: "Mission: analyze a synthetic business dataset.

Tasks:
1. Generate 1,000 rows of realistic metrics (dates, values, categories). Do not fix the random seed; every run should see fresh data.
2. Compute key statistics, trends and anomalies, and print the final statistics to stdout.
3. Save an informative plot as 'analysis_chart.png'.
4. Write findings, insights and recommendations to 'analysis_report.md'.

Constraints: use pandas for data handling and matplotlib or seaborn for plotting. Keep the script self-contained.",
        output_files: &["analysis_chart.png", "analysis_report.md"],
    },
    TaskTemplate {
        id: "code_generator",
        name: "Code Generator",
        description: "Generate a Python utility module with tests",
        prompt: "Mission: produce a well-structured Python utility module.

Tasks:
1. Create 'utils.py' with functions for data validation (type and range checks), safe JSON file reading and writing, and string sanitizing and formatting.
2. Give every function a docstring and type hints.
3. Write 'code_summary.md' describing the module with usage examples.

Requirements: PEP 8, proper error handling, and a stdout summary of the functions created.",
        output_files: &["utils.py", "code_summary.md"],
    },
    TaskTemplate {
        id: "report_generator",
        name: "Report Generator",
        description: "Generate a structured Markdown business report",
        prompt: "Mission: write a business analysis report.

Tasks:
1. Generate quarterly business data (revenue, costs, growth rates) with pandas.
2. Analyze revenue trends, growth and key metrics; print the key numbers to stdout.
3. Write 'business_report.md' with an executive summary, a Markdown metrics table, trend analysis and recommendations.
4. Save a supporting trend chart as 'metrics_chart.png'.

Never paste raw DataFrames into the report.",
        output_files: &["business_report.md", "metrics_chart.png"],
    },
    TaskTemplate {
        id: "web_scraper",
        name: "Web Scraper",
        description: "Simulate web scraping and data extraction",
        prompt: "Mission: simulate scraping and extracting product data.

Tasks:
1. Build a realistic scraped dataset of 50 product listings (name, price, rating, category).
2. Clean and structure it with pandas.
3. Analyze price distribution and rating trends; print summary statistics.
4. Save the structured data to 'scraped_data.json' and a summary to 'scraping_report.md'.

Live URLs are unavailable, so simulate varied content.",
        output_files: &["scraped_data.json", "scraping_report.md"],
    },
    TaskTemplate {
        id: "api_builder",
        name: "API Builder",
        description: "Generate a FastAPI endpoint skeleton",
        prompt: "Mission: create a FastAPI application skeleton.

Tasks:
1. Write 'api_app.py' with a health check, CRUD endpoints for a sample items resource, Pydantic request and response models, and HTTPException based error handling.
2. Document every endpoint with request and response formats in 'api_docs.md'.
3. Print a summary of all endpoints to stdout.

Requirements: type hints, docstrings and production-quality error handling.",
        output_files: &["api_app.py", "api_docs.md"],
    },
];

/// Look up a template by id.
pub fn find_template(id: &str) -> Option<&'static TaskTemplate> {
    TASK_TEMPLATES.iter().find(|t| t.id == id)
}

/// Prompt for `id`, falling back to the first template when the id is unknown.
pub fn template_prompt(id: &str) -> &'static str {
    find_template(id)
        .or_else(|| TASK_TEMPLATES.first())
        .map(|t| t.prompt)
        .unwrap_or_default()
}

pub fn is_known_model(id: &str) -> bool {
    AVAILABLE_MODELS.iter().any(|m| m.id == id)
}

pub fn is_known_output_format(id: &str) -> bool {
    OUTPUT_FORMATS.iter().any(|f| f.id == id)
}

/// Build the seed task text for a run.
///
/// An explicit `task` wins over the template. A non-`auto` output format appends a short
/// preference line so the generator knows which deliverable to favor.
pub fn compose_task(template_id: Option<&str>, task: Option<&str>, output_format: Option<&str>) -> String {
    let mut text = match task.map(str::trim).filter(|t| !t.is_empty()) {
        Some(custom) => custom.to_string(),
        None => template_prompt(template_id.unwrap_or_default()).to_string(),
    };

    if let Some(format) = output_format
        .and_then(|id| OUTPUT_FORMATS.iter().find(|f| f.id == id))
        .filter(|f| f.id != "auto")
    {
        text.push_str(&format!(
            "\n\nPreferred output format: {} ({}).",
            format.name, format.description
        ));
    }

    text
}
