//! Переключатель трассировки луча по кадрам.
//!
//! `CTC_DEBUG=1` включает `trace!` со снимком луча после каждого кадра.
//! Значение читается один раз за процесс; пустая строка считается выключенной.

use std::sync::OnceLock;

static ENABLED: OnceLock<bool> = OnceLock::new();

/// Включён ли покадровый дамп луча.
pub fn enabled() -> bool {
    *ENABLED.get_or_init(|| std::env::var_os("CTC_DEBUG").is_some_and(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_cached() {
        let first = enabled();
        assert_eq!(enabled(), first);
    }
}
