mod common;

use common::*;
use configurator_explorer::config::DomDiffLimits;
use configurator_explorer::services::DomDiffExplorer;

#[tokio::test]
async fn test_explores_nested_controls_and_reverts() {
    let explorer = DomDiffExplorer::new(diff_limits());
    let mut driver = expanding_configurator();

    let report = explorer.explore(&mut driver).await.unwrap();

    // 分类 → 色块（嵌套）→ 运费说明（无显著变化）
    assert_eq!(report.clicks, 3);
    assert!(!report.budget_exhausted);
    assert_eq!(report.states.len(), 2);
    assert_eq!(report.states[0].control_label, "Outdoor saunas");
    assert_eq!(report.states[0].depth, 0);
    let titles: Vec<&str> = report.states[0]
        .cards
        .iter()
        .map(|c| c.title.as_str())
        .collect();
    assert_eq!(titles, vec!["The Solo", "The Duo"]);
    assert_eq!(report.states[0].cards[0].price.as_deref(), Some("$39k"));
    assert_eq!(report.states[1].control_label, "Cedar interior");
    assert_eq!(report.states[1].depth, 1);

    assert_eq!(
        driver.clicks,
        vec!["Outdoor saunas", "Cedar interior", "Shipping info"]
    );
    assert_eq!(driver.reverts, 3);
    assert_eq!(driver.current_page(), "home");
}

#[tokio::test]
async fn test_report_options_use_control_as_category() {
    let explorer = DomDiffExplorer::new(diff_limits());
    let mut driver = expanding_configurator();

    let report = explorer.explore(&mut driver).await.unwrap();
    let options = report.options("default");

    assert!(options
        .iter()
        .any(|o| o.category == "Outdoor saunas" && o.component == "The Solo"));
    assert!(options
        .iter()
        .any(|o| o.category == "Outdoor saunas" && o.component == "The Duo"));
    assert!(options.iter().all(|o| o.model_context == "default"));
}

#[tokio::test]
async fn test_click_budget_stops_exploration() {
    let explorer = DomDiffExplorer::new(DomDiffLimits {
        max_clicks_per_page: 1,
        ..diff_limits()
    });
    let mut driver = expanding_configurator();

    let report = explorer.explore(&mut driver).await.unwrap();

    assert!(report.budget_exhausted);
    assert_eq!(report.clicks, 1);
    assert_eq!(report.states.len(), 1);
    assert_eq!(driver.current_page(), "home");
}

#[tokio::test]
async fn test_recursion_depth_limits_nested_controls() {
    let explorer = DomDiffExplorer::new(DomDiffLimits {
        max_recursion_depth: 1,
        ..diff_limits()
    });
    let mut driver = expanding_configurator();

    let report = explorer.explore(&mut driver).await.unwrap();

    assert_eq!(report.states.len(), 1);
    assert_eq!(report.clicks, 2);
    assert!(!driver.clicks.contains(&"Cedar interior".to_string()));
}
