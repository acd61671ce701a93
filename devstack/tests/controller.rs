//! End-to-end tests of the controller: catalog, materializer and
//! supervisor chained together against fake bundles.

mod common;

use common::*;
use devstack_processes::{ProcessStatus, StartOutcome, StopOutcome};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread")]
async fn test_start_materializes_and_stop_cleans_up() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        ctx.create_nginx_bundle("1.25.4");
        let controller = ctx.controller();

        let target = controller.target("nginx", None, None).unwrap();
        assert_eq!(target.version, "1.25.4");
        assert_eq!(target.port, Some(80));

        let StartOutcome::Started(pid) = controller.start(&target).await.unwrap() else {
            panic!("expected a fresh start");
        };

        let active = ctx.root().join("config/nginx/1.25.4");
        let conf = std::fs::read_to_string(active.join("nginx.conf")).unwrap();
        assert!(!conf.contains("${PREFIX}"));
        assert!(conf.contains(&format!("pid {};", ctx.root().join("run/nginx.pid").display())));

        let (process_id, status) = controller.status(&target).await.unwrap();
        assert_eq!(process_id, "nginx");
        assert_eq!(status, ProcessStatus::Running(pid));
        assert_eq!(
            controller.start(&target).await.unwrap(),
            StartOutcome::AlreadyRunning(pid)
        );

        let outcome = controller.stop(&target, None).await.unwrap();
        assert_eq!(outcome, StopOutcome::Stopped { pid, forced: false });
        assert!(!ctx.root().join("run/nginx.pid").exists());
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_controller_finds_running_daemon() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        ctx.create_nginx_bundle("1.25.4");

        let first = ctx.controller();
        let target = first.target("nginx", None, None).unwrap();
        let pid = first.start(&target).await.unwrap().pid();
        drop(first);

        let second = ctx.controller();
        let statuses = second.status_all().await;
        assert_eq!(statuses, vec![("nginx".to_string(), ProcessStatus::Running(pid))]);

        assert!(second.stop_all(None).await);
        assert_eq!(second.status(&target).await.unwrap().1, ProcessStatus::Stopped);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runtime_without_daemon_cannot_start() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        ctx.write_file("bundles/node/20.11.1/etc/npmrc", "prefix=${PREFIX}\n");
        let controller = ctx.controller();

        let target = controller.target("node", Some("20.11.1"), None).unwrap();
        assert!(controller.start(&target).await.is_err());
        assert!(controller.target("oracle", None, None).is_err());
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_module_toggle_restarts_running_fpm() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        ctx.create_php_bundle("8.3.4");
        let controller = ctx.controller();
        let target = controller.target("php", None, None).unwrap();

        let before = controller.start(&target).await.unwrap().pid();
        assert!(controller.set_module(&target, "xdebug", true).await.unwrap());

        let (_, status) = controller.status(&target).await.unwrap();
        let ProcessStatus::Running(after) = status else {
            panic!("php-fpm should be running after the restart");
        };
        assert_ne!(before, after);

        let modules = controller.list_modules(&target).await.unwrap();
        let xdebug = modules.iter().find(|m| m.name == "xdebug").unwrap();
        assert_eq!(xdebug.enabled_in, vec!["cli".to_string(), "fpm".to_string()]);

        // Nothing changes, nothing restarts
        assert!(!controller.set_module(&target, "xdebug", true).await.unwrap());
        assert_eq!(
            controller.status(&target).await.unwrap().1,
            ProcessStatus::Running(after)
        );

        controller.stop(&target, None).await.unwrap();
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_instance_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        ctx.create_redis_bundle("7.2.4");
        let mut controller = ctx.controller();

        assert!(controller.add_instance("nginx", "Web", None, false, None).is_err());
        let instance = controller
            .add_instance("redis", "Session Cache", Some(6380), true, None)
            .unwrap();
        assert_eq!(instance.instance_id, "session-cache");

        assert!(controller.target("redis", None, None).is_err());
        let target = controller
            .target("redis", None, Some("session-cache"))
            .unwrap();
        assert_eq!(target.port, Some(6380));

        assert_eq!(controller.start_autostart().await, 1);
        assert!(controller.status(&target).await.unwrap().1.is_running());

        let config = ctx.root().join("config/redis/session-cache");
        let data = ctx.root().join("data/redis/session-cache");
        assert!(config.join("redis.conf").is_file());
        assert!(data.is_dir());

        controller.remove_instance("session-cache").await.unwrap();
        assert!(!config.exists());
        assert!(!data.exists());
        assert!(controller.instances().list().is_empty());
        assert_eq!(controller.supervisor().list().await, vec![]);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_traversing_instance_id_is_refused() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        ctx.create_redis_bundle("7.2.4");
        ctx.write_file(
            "instances.json",
            r#"[{"instance_id": "..", "service_type_id": "redis", "display_name": "Bad", "port": 6390}]"#,
        );
        let kept = ctx.write_file("data/redis/cache/dump.rdb", "");
        let mut controller = ctx.controller();

        let target = controller.target("redis", None, Some("..")).unwrap();
        assert!(controller.paths(&target).is_err());
        assert!(controller.start(&target).await.is_err());

        assert!(controller.remove_instance("..").await.is_err());
        assert!(kept.is_file());
        assert_eq!(controller.instances().list().len(), 1);
    })
    .await
    .expect("Test timed out");
}
