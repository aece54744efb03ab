//! Fixtures shared by the factory tests

use std::sync::Arc;

use parking_lot::RwLock;

use crate::classfile::{ClassFile, MethodDef};
use crate::config::ContainerConfig;
use crate::container::persistence::ExtendedContexts;
use crate::enhancer::Enhancer;
use crate::invocation::{DynamicInterceptorManager, LocalTransactionManager, PermitAll};
use crate::metadata::BeanClassMetadata;
use crate::runtime::BeanClassLoader;

use super::FactoryServices;

pub(crate) fn services() -> FactoryServices {
    FactoryServices {
        embedded_id: 0,
        server_name: "ezb".into(),
        container_id: "c1".into(),
        config: ContainerConfig {
            pool_size: 2,
            pool_acquire_timeout_ms: 50,
            ..ContainerConfig::default()
        },
        transaction_manager: Arc::new(LocalTransactionManager::new()),
        permission_manager: Arc::new(PermitAll),
        global_interceptors: Arc::new(RwLock::new(Vec::new())),
        dynamic_interceptors: Arc::new(DynamicInterceptorManager::new()),
        statistics: None,
        extended: Arc::new(ExtendedContexts::new()),
    }
}

/// Bean class with a default constructor and body-dispatched `methods`
pub(crate) fn bean_class(name: &str, methods: &[(&str, &str)]) -> ClassFile {
    let mut class = ClassFile::new(name);
    class
        .methods
        .push(MethodDef::default_constructor("java.lang.Object"));
    for (method, descriptor) in methods {
        class
            .methods
            .push(MethodDef::from_descriptor(*method, descriptor).unwrap());
    }
    class
}

/// Enhance `class` and define the result in a fresh loader
pub(crate) fn load(metadata: &BeanClassMetadata, class: &ClassFile) -> Arc<BeanClassLoader> {
    let enhanced = Enhancer::default().enhance(&class.encode(), metadata).unwrap();
    let loader = Arc::new(BeanClassLoader::new("c1"));
    for defined in enhanced.classes() {
        loader.define(defined).unwrap();
    }
    loader
}
