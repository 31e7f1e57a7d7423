use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datapipe::{AppConfig, Blueprints, EntityFilter, JobStatus, Managers};
use datapipe_domain::TaskGraph;
use tracing::{error, info};

/// 命令行入口
#[derive(Parser, Debug)]
#[command(name = "datapipe")]
#[command(version)]
#[command(about = "数据管道编排框架 - 命令行工具")]
#[command(long_about = "校验实体蓝图、查看任务执行顺序、查询已持久化的 Job")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// 日志格式 (json, pretty)
    #[arg(long)]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 校验蓝图文件
    Check {
        /// 蓝图文件 (TOML)
        blueprints: PathBuf,
    },
    /// 输出管道中任务的执行顺序
    Plan {
        /// 蓝图文件 (TOML)
        blueprints: PathBuf,
        /// 只输出指定的管道
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// 输出生效的配置
    Config,
    /// 列出已持久化的 Job
    Jobs {
        /// 按状态过滤，例如 COMPLETED
        #[arg(short, long)]
        status: Option<String>,
        /// 按提交ID过滤
        #[arg(long)]
        submit_id: Option<String>,
    },
    /// 删除全部已持久化的实体
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format);
    datapipe_core::logging::init_logging(log_level, log_format)?;

    if let Err(e) = run(cli.command, config).await {
        error!("命令执行失败: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Check { blueprints } => {
            let blueprints = load_blueprints(&blueprints)?;
            blueprints.check()?;
            println!(
                "蓝图有效: {} 个数据节点, {} 个任务, {} 个管道, {} 个场景",
                blueprints.data_nodes.len(),
                blueprints.tasks.len(),
                blueprints.pipelines.len(),
                blueprints.scenarios.len()
            );
        }
        Commands::Plan {
            blueprints,
            pipeline,
        } => {
            let blueprints = load_blueprints(&blueprints)?;
            blueprints.check()?;
            for pipeline_config in &blueprints.pipelines {
                if pipeline.as_ref().is_some_and(|id| id != &pipeline_config.id) {
                    continue;
                }
                println!("{}", pipeline_config.id);
                for (step, task) in plan(&blueprints, &pipeline_config.id)?.iter().enumerate() {
                    println!("  {}. {}", step + 1, task);
                }
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
        Commands::Jobs { status, submit_id } => {
            let mut filters = Vec::new();
            if let Some(status) = status {
                let status: JobStatus =
                    serde_json::from_value(serde_json::Value::String(status.to_uppercase()))
                        .with_context(|| format!("未知的 Job 状态: {status}"))?;
                filters.push(EntityFilter::new("status", status.as_str()));
            }
            if let Some(submit_id) = submit_id {
                filters.push(EntityFilter::new("submit_id", submit_id));
            }

            let managers = Managers::from_config(&config.core);
            let mut jobs = managers.jobs.get_all_by(&filters).await?;
            jobs.sort_by_key(|job| job.creation_date);
            for job in &jobs {
                println!(
                    "{}\t{}\t{}\t{}",
                    job.creation_date.to_rfc3339(),
                    job.id,
                    job.status.as_str(),
                    job.submit_entity_id
                );
            }
            info!("共 {} 个 Job", jobs.len());
        }
        Commands::Clean => {
            Managers::from_config(&config.core).clean_all_entities().await?;
            println!("已删除 {} 下的全部实体", config.core.storage_path().display());
        }
    }
    Ok(())
}

fn load_blueprints(path: &Path) -> Result<Blueprints> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取蓝图文件失败: {}", path.display()))?;
    Ok(Blueprints::from_toml_str(&content)?)
}

/// 管道内任务的拓扑顺序
fn plan(blueprints: &Blueprints, pipeline_id: &str) -> Result<Vec<String>> {
    let pipeline = blueprints.pipeline(pipeline_id)?;
    let tasks = pipeline
        .tasks
        .iter()
        .map(|id| blueprints.task(id))
        .collect::<Result<Vec<_>, _>>()?;
    let graph = TaskGraph::build(
        tasks
            .iter()
            .map(|t| (t.id.clone(), t.inputs.clone(), t.outputs.clone())),
    );
    Ok(graph
        .topological_order()?
        .into_iter()
        .map(|index| graph.id(index).to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datapipe::{DataNodeConfig, PipelineConfig, TaskConfig};

    #[test]
    fn test_plan_orders_tasks_by_data_flow() {
        let mut blueprints = Blueprints::new();
        blueprints
            .configure_data_node(DataNodeConfig::new("a", "in_memory"))
            .configure_data_node(DataNodeConfig::new("b", "in_memory"))
            .configure_data_node(DataNodeConfig::new("c", "in_memory"))
            .configure_task(TaskConfig::new("second", "f", &["b"], &["c"]))
            .configure_task(TaskConfig::new("first", "f", &["a"], &["b"]))
            .configure_pipeline(PipelineConfig::new("p", &["second", "first"]));

        assert_eq!(plan(&blueprints, "p").unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_cli_parses_jobs_filters() {
        let cli = Cli::parse_from(["datapipe", "--config", "a.toml", "jobs", "--status", "failed"]);
        assert_eq!(cli.config.as_deref(), Some("a.toml"));
        match cli.command {
            Commands::Jobs { status, submit_id } => {
                assert_eq!(status.as_deref(), Some("failed"));
                assert!(submit_id.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
