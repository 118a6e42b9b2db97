//! BI-Agent CLI
//!
//! - `run <QUERY> -d <DATA_DIR>`：执行一次数据分析任务，打印最终结果，成功退出码 0、失败 1
//! - `show-config`：打印合并后的配置（不含密钥）

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use bi_agent::config::{load_config, AppConfig};
use bi_agent::llm::{create_llm_client, ClientOptions, Provider};
use bi_agent::{observability, Agent, AgentOptions};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bi-agent", about = "BI-Agent：数据分析智能体", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 额外的配置文件（叠加在 config/default.toml 之上）
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行数据分析任务
    Run {
        /// 分析需求
        query: String,

        /// 数据目录
        #[arg(short, long)]
        data_dir: PathBuf,

        /// 输出目录（默认取配置 [app].output_dir）
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// LLM 提供方：openai / doubao / qwen / deepseek
        #[arg(short, long)]
        provider: Option<String>,

        /// 模型名称
        #[arg(short, long)]
        model: Option<String>,

        /// API Key（默认从提供方对应的环境变量读取）
        #[arg(short = 'k', long)]
        api_key: Option<String>,

        #[arg(long)]
        base_url: Option<String>,

        /// 最大执行步数
        #[arg(long)]
        max_steps: Option<usize>,

        /// 运行前清空会话记忆
        #[arg(long)]
        clear_memory: bool,

        /// 长期记忆归属的用户
        #[arg(long, env = "BI_AGENT_USER_ID")]
        user_id: Option<String>,

        /// 附加到任务提示末尾的参数，格式 key=value，可重复
        #[arg(short = 'a', long = "arg", value_parser = parse_key_value)]
        extra_args: Vec<(String, String)>,
    },

    /// 打印当前生效的配置
    ShowConfig,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("参数格式应为 key=value: {}", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("错误: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let mut config = load_config(cli.config).context("加载配置失败")?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(true)
        }
        Commands::Run {
            query,
            data_dir,
            output_dir,
            provider,
            model,
            api_key,
            base_url,
            max_steps,
            clear_memory,
            user_id,
            extra_args,
        } => {
            if let Some(n) = max_steps {
                config.agent.max_steps = n;
            }
            let provider = Provider::parse(provider.as_deref().unwrap_or(&config.llm.provider));
            let api_key = provider
                .resolve_api_key(api_key.as_deref().or(config.llm.api_key.as_deref()))
                .with_context(|| format!("未找到 {} 的 API Key，请使用 -k 或设置 {:?}", provider, provider.api_key_envs()))?;
            let model = provider.resolve_model(model.as_deref().or(Some(config.llm.model.as_str())));
            let llm = create_llm_client(&ClientOptions {
                provider,
                model,
                api_key,
                base_url: base_url.or_else(|| config.llm.base_url.clone()),
                timeout_secs: config.llm.timeouts.request,
                strict_tools: config.llm.strict_tool_schema,
            });

            let options = AgentOptions {
                data_dir,
                output_dir: output_dir.unwrap_or_else(|| config.app.output_dir.clone()),
                user_id: user_id.unwrap_or_else(|| config.app.user_id.clone()),
                session_id: uuid::Uuid::new_v4().to_string(),
                clear_memory,
            };
            run_task(&config, llm, options, &query, &extra_args).await
        }
    }
}

async fn run_task(
    config: &AppConfig,
    llm: std::sync::Arc<dyn bi_agent::llm::LlmClient>,
    options: AgentOptions,
    query: &str,
    extra_args: &[(String, String)],
) -> anyhow::Result<bool> {
    let mut agent = Agent::new(config, llm, options).context("初始化 Agent 失败")?;
    tracing::info!(
        data_dir = %agent.data_dir().display(),
        output_dir = %agent.output_dir().display(),
        "starting analysis"
    );
    let execution = agent.run(query, extra_args).await;

    let status = if execution.success { "✅ 任务完成" } else { "❌ 任务未完成" };
    println!("{}（{} 步，{:.1} 秒）", status, execution.steps.len(), execution.execution_time);
    if let Some(result) = &execution.final_result {
        println!("{}", result);
    }
    if let Some(error) = execution.last_error() {
        if execution.final_result.as_deref().map_or(true, |r| !r.contains(error)) {
            eprintln!("最后一步错误: {}", error);
        }
    }
    Ok(execution.success)
}
