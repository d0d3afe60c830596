use anyhow::Result;
use configurator_explorer::utils::logging;
use configurator_explorer::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：CONFIG_FILE 指定 TOML 文件，否则只读环境变量
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => Config::from_toml_file(&path)?,
        Err(_) => {
            let config = Config::from_env();
            config.validate()?;
            config
        }
    };

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
