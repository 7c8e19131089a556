//! In-memory filtering over the static country dataset.
//!
//! Filters compose as a sequential `AND` chain, so their order does not
//! change the result. The top-N stages run last: area first, then population.
//!
//! A record counts as a country only when `independent` is `true`. Anything
//! else, including an explicit `null`, lands in the territory list, so every
//! filtered record appears in exactly one of the two lists.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub name: String,
    #[serde(rename = "threeLetterISOCountryCode", default)]
    pub three_letter_iso_country_code: String,
    /// Missing or `null` in the source data for some territories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub independent: Option<bool>,
    #[serde(default)]
    pub capital: String,
    #[serde(default)]
    pub landlocked: bool,
    #[serde(default)]
    pub borders: Vec<String>,
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub continent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub belongs_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_url: Option<String>,
}

impl Country {
    pub fn is_independent(&self) -> bool {
        self.independent == Some(true)
    }
}

/// Filter settings. Empty strings, `0` and `false` mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CountryFilter {
    pub starts_with: String,
    pub contains_substring: String,
    pub ends_with: String,
    pub continent: String,
    /// Keeps countries with a population strictly below this.
    pub population: u64,
    pub capital: String,
    pub landlocked: bool,
    pub independent: bool,
    pub dependency: bool,
    pub belongs_to: String,
    /// Name fragment of a country whose neighbours to keep.
    pub neighbor: String,
    #[serde(rename = "topNByArea")]
    pub top_n_by_area: Option<usize>,
    #[serde(rename = "topNByPopulation")]
    pub top_n_by_population: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub countries: Vec<Country>,
    pub territories: Vec<Country>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl CountryFilter {
    /// Runs the filter chain over `dataset` and splits the result.
    pub fn apply(&self, dataset: &[Country]) -> FilterOutcome {
        let mut result: Vec<&Country> = dataset.iter().collect();

        if !self.starts_with.is_empty() {
            let prefix = self.starts_with.to_lowercase();
            result.retain(|c| c.name.to_lowercase().starts_with(&prefix));
        }
        if !self.contains_substring.is_empty() {
            result.retain(|c| contains_ci(&c.name, &self.contains_substring));
        }
        if !self.ends_with.is_empty() {
            let suffix = self.ends_with.to_lowercase();
            result.retain(|c| c.name.to_lowercase().ends_with(&suffix));
        }
        if !self.continent.is_empty() {
            result.retain(|c| contains_ci(&c.continent, &self.continent));
        }
        if self.population > 0 {
            result.retain(|c| c.population < self.population);
        }
        if !self.capital.is_empty() {
            result.retain(|c| contains_ci(&c.capital, &self.capital));
        }
        if self.landlocked {
            result.retain(|c| c.landlocked);
        }
        if self.independent {
            result.retain(|c| c.is_independent());
        }
        if self.dependency {
            result.retain(|c| !c.is_independent());
        }
        if !self.belongs_to.is_empty() {
            result.retain(|c| c.belongs_to.as_deref() == Some(self.belongs_to.as_str()));
        }

        if !self.neighbor.is_empty() {
            match dataset.iter().find(|c| contains_ci(&c.name, &self.neighbor)) {
                Some(anchor) => {
                    let code = &anchor.three_letter_iso_country_code;
                    result.retain(|c| c.borders.contains(code));
                }
                None => result.clear(),
            }
        }

        if let Some(n) = self.top_n_by_area.filter(|n| *n > 0) {
            result.sort_by(|a, b| b.area.total_cmp(&a.area));
            result.truncate(n);
        }
        if let Some(n) = self.top_n_by_population.filter(|n| *n > 0) {
            result.sort_by(|a, b| b.population.cmp(&a.population));
            result.truncate(n);
        }

        let (countries, territories): (Vec<&Country>, Vec<&Country>) =
            result.into_iter().partition(|c| c.is_independent());
        debug!(
            "Country filter kept {} countries and {} territories",
            countries.len(),
            territories.len()
        );
        FilterOutcome {
            countries: countries.into_iter().cloned().collect(),
            territories: territories.into_iter().cloned().collect(),
        }
    }
}

/// Distinct `belongsTo` values in first-seen order.
pub fn governing_countries(dataset: &[Country]) -> Vec<String> {
    let mut seen = HashSet::new();
    dataset
        .iter()
        .filter_map(|c| c.belongs_to.as_deref())
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Maps border codes to country names; unknown codes are returned as-is.
pub fn neighbor_names(country: &Country, dataset: &[Country]) -> Vec<String> {
    country
        .borders
        .iter()
        .map(|code| {
            dataset
                .iter()
                .find(|c| &c.three_letter_iso_country_code == code)
                .map_or_else(|| code.clone(), |c| c.name.clone())
        })
        .collect()
}

const GOVERNING_COUNTRY: &[(&str, &str)] = &[
    ("South Georgia", "United Kingdom"),
    ("Wallis and Futuna", "France"),
    ("Pitcairn Islands", "United Kingdom"),
    ("Caribbean Netherlands", "Netherlands"),
    ("Northern Mariana Islands", "United States"),
    ("Saint Barthélemy", "France"),
    ("Guernsey", "United Kingdom"),
    ("Svalbard and Jan Mayen", "Norway"),
    ("Faroe Islands", "Denmark"),
    ("Palestine", "Disputed"),
    ("Aruba", "Netherlands"),
    ("Cook Islands", "New Zealand"),
    ("Christmas Island", "Australia"),
    ("Tokelau", "New Zealand"),
    ("Réunion", "France"),
    ("Montserrat", "United Kingdom"),
    ("United States Virgin Islands", "United States"),
    ("Antarctica", "International"),
    ("Puerto Rico", "United States"),
    ("Mayotte", "France"),
    ("Norfolk Island", "Australia"),
    ("Bouvet Island", "Norway"),
    ("Isle of Man", "United Kingdom"),
    ("Greenland", "Denmark"),
    ("French Southern and Antarctic Lands", "France"),
    ("Saint Pierre and Miquelon", "France"),
    ("Macau", "China"),
    ("Sint Maarten", "Netherlands"),
    ("Turks and Caicos Islands", "United Kingdom"),
    ("Cocos (Keeling) Islands", "Australia"),
    ("Western Sahara", "Disputed"),
    ("French Polynesia", "France"),
    ("Guadeloupe", "France"),
    ("Gibraltar", "United Kingdom"),
    ("New Caledonia", "France"),
    ("Saint Helena, Ascension and Tristan da Cunha", "United Kingdom"),
    ("British Virgin Islands", "United Kingdom"),
    ("Niue", "New Zealand"),
    ("Heard Island and McDonald Islands", "Australia"),
    ("Hong Kong", "China"),
    ("Curaçao", "Netherlands"),
    ("French Guiana", "France"),
    ("Åland Islands", "Finland"),
    ("United States Minor Outlying Islands", "United States"),
    ("Falkland Islands", "United Kingdom"),
    ("Jersey", "United Kingdom"),
    ("Bermuda", "United Kingdom"),
    ("British Indian Ocean Territory", "United Kingdom"),
    ("Martinique", "France"),
    ("Cayman Islands", "United Kingdom"),
    ("Guam", "United States"),
    ("Saint Martin", "France"),
    ("American Samoa", "United States"),
    ("Anguilla", "United Kingdom"),
];

const FORCED_INDEPENDENT: &[&str] = &["Taiwan", "Kosovo"];

/// Fills in `belongsTo` for known territories and marks Taiwan and Kosovo
/// independent. Returns how many records changed.
pub fn enrich_countries(dataset: &mut [Country]) -> usize {
    let mut changed = 0;
    for country in dataset.iter_mut() {
        let before = (country.independent, country.belongs_to.clone());
        if FORCED_INDEPENDENT.contains(&country.name.as_str()) {
            country.independent = Some(true);
        }
        if let Some((_, governor)) = GOVERNING_COUNTRY.iter().find(|(name, _)| *name == country.name) {
            country.belongs_to = Some((*governor).to_string());
        }
        if (country.independent, country.belongs_to.clone()) != before {
            changed += 1;
        }
    }
    changed
}

pub fn load_countries(path: &Path) -> Result<Vec<Country>, AppResponse> {
    let contents = std::fs::read_to_string(path)?;
    let countries: Vec<Country> = serde_json::from_str(&contents)?;
    info!("Loaded {} countries from {}", countries.len(), path.display());
    Ok(countries)
}

pub fn save_countries(path: &Path, countries: &[Country]) -> Result<(), AppResponse> {
    let json = serde_json::to_string_pretty(countries)?;
    std::fs::write(path, json)?;
    info!("Wrote {} countries to {}", countries.len(), path.display());
    Ok(())
}
