use crate::bus::{Event, EventBus};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const THEME_MODE_KEY: &str = "themeMode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark => ThemeMode::Light,
        }
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown theme mode: {0}")]
pub struct UnknownThemeMode(pub String);

impl FromStr for ThemeMode {
    type Err = UnknownThemeMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(ThemeMode::Light),
            "dark" => Ok(ThemeMode::Dark),
            other => Err(UnknownThemeMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorSet {
    pub main: &'static str,
    pub light: &'static str,
    pub dark: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Background {
    pub default: &'static str,
    pub paper: &'static str,
    pub accent: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextColors {
    pub primary: &'static str,
    pub secondary: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Palette {
    pub primary: ColorSet,
    pub secondary: ColorSet,
    pub success: ColorSet,
    pub background: Background,
    pub text: TextColors,
    pub divider: &'static str,
}

/// Style values handed to the presentation layer for one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeConfig {
    pub mode: ThemeMode,
    pub palette: Palette,
    pub font_family: &'static str,
}

impl ThemeConfig {
    pub fn for_mode(mode: ThemeMode) -> Self {
        let light = mode == ThemeMode::Light;
        let pick = |l: &'static str, d: &'static str| if light { l } else { d };

        Self {
            mode,
            palette: Palette {
                primary: ColorSet {
                    main: "#4F46E5",
                    light: "#818CF8",
                    dark: "#3730A3",
                },
                secondary: ColorSet {
                    main: "#06B6D4",
                    light: "#67E8F9",
                    dark: "#0E7490",
                },
                success: ColorSet {
                    main: "#10B981",
                    light: "#6EE7B7",
                    dark: "#047857",
                },
                background: Background {
                    default: pick("#F9FAFB", "#111827"),
                    paper: pick("#FFFFFF", "#1F2937"),
                    accent: pick("#F3F4F6", "#374151"),
                },
                text: TextColors {
                    primary: pick("#111827", "#F9FAFB"),
                    secondary: pick("#4B5563", "#D1D5DB"),
                },
                divider: pick("#E5E7EB", "#374151"),
            },
            font_family: "\"Plus Jakarta Sans\", \"Inter\", \"Helvetica\", \"Arial\", sans-serif",
        }
    }
}

/// Key/value persistence for visitor preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Current light/dark mode, backed by a preference store.
pub struct ThemeController {
    mode: RwLock<ThemeMode>,
    store: Arc<dyn PreferenceStore>,
    bus: Arc<EventBus>,
}

impl ThemeController {
    /// Restores the stored mode, falling back to the system preference when
    /// nothing valid is stored.
    pub async fn load(
        store: Arc<dyn PreferenceStore>,
        bus: Arc<EventBus>,
        prefers_dark: bool,
    ) -> Result<Self> {
        let fallback = if prefers_dark {
            ThemeMode::Dark
        } else {
            ThemeMode::Light
        };

        let mode = match store.get(THEME_MODE_KEY).await? {
            Some(stored) => stored.parse().unwrap_or_else(|e| {
                warn!("Ignoring stored theme preference: {}", e);
                fallback
            }),
            None => fallback,
        };
        info!("Theme mode: {}", mode);

        Ok(Self {
            mode: RwLock::new(mode),
            store,
            bus,
        })
    }

    pub async fn mode(&self) -> ThemeMode {
        *self.mode.read().await
    }

    pub async fn config(&self) -> ThemeConfig {
        ThemeConfig::for_mode(self.mode().await)
    }

    pub async fn set_mode(&self, mode: ThemeMode) -> Result<ThemeMode> {
        let mut current = self.mode.write().await;
        self.store.set(THEME_MODE_KEY, mode.as_str()).await?;
        *current = mode;
        self.bus.publish(Event::ThemeChanged { mode });
        Ok(mode)
    }

    pub async fn toggle(&self) -> Result<ThemeMode> {
        let mut current = self.mode.write().await;
        let next = current.toggled();
        self.store.set(THEME_MODE_KEY, next.as_str()).await?;
        *current = next;
        self.bus.publish(Event::ThemeChanged { mode: next });
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn controller(
        store: Arc<MemoryPreferences>,
        prefers_dark: bool,
    ) -> ThemeController {
        ThemeController::load(store, Arc::new(EventBus::new()), prefers_dark)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn falls_back_to_system_preference() {
        let store = Arc::new(MemoryPreferences::default());
        assert_eq!(controller(store.clone(), true).await.mode().await, ThemeMode::Dark);
        assert_eq!(controller(store, false).await.mode().await, ThemeMode::Light);
    }

    #[tokio::test]
    async fn stored_mode_wins_over_system() {
        let store = Arc::new(MemoryPreferences::default());
        store.set(THEME_MODE_KEY, "light").await.unwrap();
        assert_eq!(controller(store, true).await.mode().await, ThemeMode::Light);
    }

    #[tokio::test]
    async fn garbage_preference_is_ignored() {
        let store = Arc::new(MemoryPreferences::default());
        store.set(THEME_MODE_KEY, "sepia").await.unwrap();
        assert_eq!(controller(store, true).await.mode().await, ThemeMode::Dark);
    }

    #[tokio::test]
    async fn toggle_persists() {
        let store = Arc::new(MemoryPreferences::default());
        let theme = controller(store.clone(), false).await;

        assert_eq!(theme.toggle().await.unwrap(), ThemeMode::Dark);
        assert_eq!(store.get(THEME_MODE_KEY).await.unwrap().as_deref(), Some("dark"));

        let reloaded = controller(store.clone(), false).await;
        assert_eq!(reloaded.mode().await, ThemeMode::Dark);

        theme.set_mode(ThemeMode::Light).await.unwrap();
        assert_eq!(store.get(THEME_MODE_KEY).await.unwrap().as_deref(), Some("light"));
    }

    #[test]
    fn palette_follows_mode() {
        let light = ThemeConfig::for_mode(ThemeMode::Light);
        let dark = ThemeConfig::for_mode(ThemeMode::Dark);
        assert_eq!(light.palette.primary, dark.palette.primary);
        assert_eq!(light.palette.background.default, "#F9FAFB");
        assert_eq!(dark.palette.background.default, "#111827");
        assert_eq!(dark.palette.divider, "#374151");
    }
}
